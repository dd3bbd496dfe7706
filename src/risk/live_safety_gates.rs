use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::warn;

use crate::config::LiveSafetyLimits;
use crate::database::Store;
use crate::types::{Balance, Pair, Side, TradingMode};

/// Only evaluated when the current mode is LIVE; bypassed entirely in
/// PAPER mode. Any check error blocks the trade — fail-safe, not fail-open.
pub struct LiveSafetyGates {
    store: Arc<Store>,
}

#[derive(Debug, Clone)]
pub struct SafetyCheckResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl SafetyCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

impl LiveSafetyGates {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// `balance` is `None` when the caller has no trading client handy
    /// (the balance-sufficiency check is then skipped, matching the
    /// upstream behavior this gate generalizes).
    #[allow(clippy::too_many_arguments)]
    pub async fn check(
        &self,
        mode: TradingMode,
        pair: Pair,
        side: Side,
        order_value_zar: Decimal,
        quantity: Decimal,
        portfolio_value_zar: Decimal,
        balance: Option<&Balance>,
        limits: &LiveSafetyLimits,
    ) -> anyhow::Result<SafetyCheckResult> {
        if !matches!(mode, TradingMode::Live) {
            return Ok(SafetyCheckResult::pass());
        }

        if order_value_zar < limits.min_order_value_zar {
            let reason = format!(
                "order value {} below minimum {}",
                order_value_zar, limits.min_order_value_zar
            );
            warn!(%reason, "live safety gate blocked trade");
            return Ok(SafetyCheckResult::fail(reason));
        }

        if order_value_zar > limits.max_order_size_zar {
            let reason = format!(
                "order value {} exceeds maximum {}",
                order_value_zar, limits.max_order_size_zar
            );
            warn!(%reason, "live safety gate blocked trade");
            return Ok(SafetyCheckResult::fail(reason));
        }

        let since_midnight = chrono::Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let trades_today = self.store.count_positions_opened_since(since_midnight).await?;
        if trades_today >= limits.max_daily_trades as i64 {
            let reason = format!(
                "daily trade count {} reached limit {}",
                trades_today, limits.max_daily_trades
            );
            warn!(%reason, "live safety gate blocked trade");
            return Ok(SafetyCheckResult::fail(reason));
        }

        if let Some(balance) = balance {
            let sufficient = match side {
                Side::Buy => {
                    let required = order_value_zar
                        * (Decimal::ONE + (limits.fee_pct + limits.balance_buffer_pct) / dec!(100));
                    balance.available >= required
                }
                Side::Sell => balance.available >= quantity,
            };
            if !sufficient {
                let reason = "insufficient balance for order plus buffer".to_string();
                warn!(%reason, "live safety gate blocked trade");
                return Ok(SafetyCheckResult::fail(reason));
            }
        }

        if matches!(side, Side::Buy) && portfolio_value_zar > Decimal::ZERO {
            let current_exposure = self.store.current_exposure_to_pair(pair).await?;
            let projected_pct =
                (current_exposure + order_value_zar) / portfolio_value_zar * dec!(100);
            if projected_pct > limits.max_position_exposure_pct {
                let reason = format!(
                    "projected exposure to {} would be {:.2}%, exceeding limit {}%",
                    pair, projected_pct, limits.max_position_exposure_pct
                );
                warn!(%reason, "live safety gate blocked trade");
                return Ok(SafetyCheckResult::fail(reason));
            }
        }

        Ok(SafetyCheckResult::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveSafetyLimits;
    use crate::database::Store;

    #[tokio::test]
    async fn paper_mode_bypasses_every_check() {
        let store = Arc::new(Store::new("sqlite::memory:").await.unwrap());
        let gates = LiveSafetyGates::new(store);
        let result = gates
            .check(
                TradingMode::Paper,
                Pair::BTCZAR,
                Side::Buy,
                dec!(1_000_000),
                dec!(1),
                dec!(100000),
                None,
                &LiveSafetyLimits::default(),
            )
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn live_order_over_max_size_is_blocked() {
        let store = Arc::new(Store::new("sqlite::memory:").await.unwrap());
        let gates = LiveSafetyGates::new(store);
        let limits = LiveSafetyLimits {
            max_order_size_zar: dec!(10000),
            ..LiveSafetyLimits::default()
        };
        let result = gates
            .check(
                TradingMode::Live,
                Pair::BTCZAR,
                Side::Buy,
                dec!(42500),
                dec!(0.05),
                dec!(100000),
                None,
                &limits,
            )
            .await
            .unwrap();
        assert!(!result.passed);
        assert!(result.reason.unwrap().contains("exceeds maximum"));
    }
}
