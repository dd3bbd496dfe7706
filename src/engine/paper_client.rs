use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::types::{Balance, OrderResult, OrderStatus, Pair, Side, TradingMode};

const BASE_SLIPPAGE_BPS: f64 = 5.0;
const TAKER_FEE_PCT: Decimal = dec!(0.001);

/// Simulated fills against the live price cache, for PAPER mode. Every
/// fill injects latency and slippage so paper results are not
/// unrealistically perfect; the resulting position row (inserted by the
/// position manager) is the audit trail for each simulated order.
pub struct PaperClient {
    price_cache: Arc<RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
    balances: RwLock<HashMap<String, Decimal>>,
}

impl PaperClient {
    pub fn new(
        price_cache: Arc<RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
        initial_balance_zar: Decimal,
    ) -> Self {
        let mut balances = HashMap::new();
        balances.insert("ZAR".to_string(), initial_balance_zar);
        Self {
            price_cache,
            balances: RwLock::new(balances),
        }
    }

    async fn current_price(&self, pair: Pair) -> anyhow::Result<Decimal> {
        self.price_cache
            .read()
            .await
            .get(&pair)
            .map(|(price, _)| *price)
            .ok_or_else(|| anyhow::anyhow!("no cached price available for {}", pair))
    }

    /// `base_bps + order_value / 100_000_000 + uniform(-2, 2) bps`, clamped
    /// to `[0, 50]` bps, expressed as a percentage.
    fn slippage_pct(order_value_zar: Decimal) -> Decimal {
        let order_value_f64 = order_value_zar.to_f64().unwrap_or(0.0);
        let size_impact_bps = order_value_f64 / 100_000_000.0;
        let jitter_bps = rand::thread_rng().gen_range(-2.0..=2.0);
        let bps = (BASE_SLIPPAGE_BPS + size_impact_bps + jitter_bps).clamp(0.0, 50.0);
        Decimal::from_f64_retain(bps / 100.0).unwrap_or(Decimal::ZERO)
    }

    fn latency_ms() -> u64 {
        rand::thread_rng().gen_range(50..=200)
    }

    async fn fill(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        market_price: Decimal,
    ) -> OrderResult {
        let order_value = market_price * quantity;
        let slippage_pct = Self::slippage_pct(order_value);

        // Slippage is adverse: worse fill price for the trader in either
        // direction (higher on a buy, lower on a sell).
        let adverse_sign = match side {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        };
        let fill_price = market_price * (Decimal::ONE + adverse_sign * slippage_pct / dec!(100));
        let fees = fill_price * quantity * TAKER_FEE_PCT;
        let latency_ms = Self::latency_ms();
        tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;

        {
            let mut balances = self.balances.write().await;
            let base = pair.base_asset().to_string();
            let notional = fill_price * quantity + fees;
            match side {
                Side::Buy => {
                    *balances.entry("ZAR".to_string()).or_insert(Decimal::ZERO) -= notional;
                    *balances.entry(base).or_insert(Decimal::ZERO) += quantity;
                }
                Side::Sell => {
                    *balances.entry(base).or_insert(Decimal::ZERO) -= quantity;
                    *balances.entry("ZAR".to_string()).or_insert(Decimal::ZERO) +=
                        fill_price * quantity - fees;
                }
            }
        }

        let order_id = Uuid::new_v4().to_string();
        debug!(
            order_id = %order_id, pair = %pair, side = %side, %quantity, %fill_price,
            %slippage_pct, %fees, "paper order filled"
        );

        OrderResult {
            success: true,
            order_id,
            pair,
            side,
            quantity,
            fill_price,
            market_price,
            slippage_pct,
            fees,
            latency_ms,
            status: OrderStatus::Filled,
            filled_at: Utc::now(),
            mode: TradingMode::Paper,
            error: None,
            routed_via: None,
            safety_checked: false,
            safety_status: None,
        }
    }

    pub async fn place_market_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResult> {
        let market_price = self.current_price(pair).await?;
        Ok(self.fill(pair, side, quantity, market_price).await)
    }

    /// Paper limit orders fill immediately at the limit price when it is
    /// at least as good as the current market price, matching the
    /// simplified simulated-exchange behavior the teacher's paper engine
    /// uses; otherwise the order fails (no partial/queued fills here).
    pub async fn place_limit_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> anyhow::Result<OrderResult> {
        let market_price = self.current_price(pair).await?;
        let marketable = match side {
            Side::Buy => limit_price >= market_price,
            Side::Sell => limit_price <= market_price,
        };
        if !marketable {
            return Ok(OrderResult {
                success: false,
                order_id: Uuid::new_v4().to_string(),
                pair,
                side,
                quantity,
                fill_price: Decimal::ZERO,
                market_price,
                slippage_pct: Decimal::ZERO,
                fees: Decimal::ZERO,
                latency_ms: 0,
                status: OrderStatus::Rejected,
                filled_at: Utc::now(),
                mode: TradingMode::Paper,
                error: Some("limit price not marketable in simulated order book".to_string()),
                routed_via: None,
                safety_checked: false,
                safety_status: None,
            });
        }
        Ok(self.fill(pair, side, quantity, limit_price).await)
    }

    pub async fn get_balance(&self, currency: &str) -> Decimal {
        self.balances
            .read()
            .await
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn get_all_balances(&self) -> Vec<Balance> {
        self.balances
            .read()
            .await
            .iter()
            .map(|(currency, available)| Balance {
                currency: currency.clone(),
                available: *available,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_clamped_to_fifty_bps() {
        let pct = PaperClient::slippage_pct(dec!(10_000_000_000));
        assert!(pct <= dec!(0.5));
        assert!(pct >= Decimal::ZERO);
    }

    #[tokio::test]
    async fn market_order_fills_at_adverse_slippage_for_buy() {
        let price_cache = Arc::new(RwLock::new(HashMap::new()));
        price_cache.write().await.insert(Pair::BTCZAR, (dec!(850000), Utc::now()));
        let client = PaperClient::new(price_cache, dec!(100000));

        let result = client
            .place_market_order(Pair::BTCZAR, Side::Buy, dec!(0.01))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.fill_price >= result.market_price);
    }
}
