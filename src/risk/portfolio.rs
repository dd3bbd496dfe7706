use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::warn;

use crate::config::PortfolioRiskLimits;
use crate::database::Store;
use crate::types::{Pair, PortfolioState, Position, TimeFrame, TradeParameters};

/// Tier 5 gatekeeper. Runs all seven checks against the current portfolio
/// state and open positions; any failure short-circuits with a reason
/// string listing every violation observed up to that point.
pub struct PortfolioRiskManager {
    store: Arc<Store>,
}

#[derive(Debug, Clone)]
pub struct PortfolioRiskResult {
    pub passed: bool,
    pub reason: Option<String>,
    pub violated_limits: Vec<String>,
    pub metrics: PortfolioRiskMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioRiskMetrics {
    pub current_drawdown_pct: Decimal,
    pub today_pnl_pct: Decimal,
    pub aggregate_at_risk_zar: Decimal,
    pub dynamic_risk_limit_pct: Decimal,
    pub proposed_single_position_pct: Decimal,
    pub projected_sector_exposure_pct: Decimal,
    pub projected_leverage_ratio: Decimal,
}

impl PortfolioRiskManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn check(
        &self,
        pair: Pair,
        params: &TradeParameters,
        limits: &PortfolioRiskLimits,
    ) -> anyhow::Result<PortfolioRiskResult> {
        let portfolio = self
            .store
            .get_portfolio_state()
            .await?
            .unwrap_or_else(|| PortfolioState::initial(dec!(100000)));
        let open_positions = self.store.get_open_positions().await?;

        let mut violations = Vec::new();
        let mut metrics = PortfolioRiskMetrics {
            current_drawdown_pct: portfolio.current_drawdown_pct,
            ..Default::default()
        };

        if portfolio.total_value_zar <= Decimal::ZERO {
            violations.push("portfolio value is zero".to_string());
            return Ok(PortfolioRiskResult {
                passed: false,
                reason: Some(violations.join("; ")),
                violated_limits: violations,
                metrics,
            });
        }

        // 1. Drawdown.
        if portfolio.current_drawdown_pct > limits.max_drawdown_pct {
            violations.push(format!(
                "drawdown {:.2}% exceeds limit {:.2}%",
                portfolio.current_drawdown_pct, limits.max_drawdown_pct
            ));
        }

        // 2. Daily loss (realized P&L of positions closed since 00:00 UTC).
        let today_start = chrono::Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let closed_today = self.store.get_positions_closed_since(today_start).await?;
        let today_pnl_zar: Decimal = closed_today.iter().filter_map(|p| p.pnl_zar).sum();
        let today_pnl_pct = today_pnl_zar / portfolio.total_value_zar * dec!(100);
        metrics.today_pnl_pct = today_pnl_pct;
        if today_pnl_pct < -limits.daily_loss_limit_pct {
            violations.push(format!(
                "today's P&L {:.2}% breaches daily loss limit -{:.2}%",
                today_pnl_pct, limits.daily_loss_limit_pct
            ));
        }

        // 3. Risk-based capacity (dynamic, volatility-scaled).
        let aggregate_at_risk: Decimal = open_positions
            .iter()
            .filter(|p| p.status.is_open())
            .map(|p| {
                let risk_fraction = (p.entry_price - p.stop_loss_price).abs() / p.entry_price;
                p.position_value_zar * risk_fraction
            })
            .sum();
        let trade_risk = params.position_size_zar * params.stop_loss_pct / dec!(100);
        let total_at_risk = aggregate_at_risk + trade_risk;
        metrics.aggregate_at_risk_zar = total_at_risk;

        let volatility_pct = self.forecast_daily_volatility_pct().await?;
        let dynamic_limit_pct = Self::scale_risk_capacity(volatility_pct, limits);
        metrics.dynamic_risk_limit_pct = dynamic_limit_pct;
        let risk_limit_zar = portfolio.total_value_zar * dynamic_limit_pct / dec!(100);
        if total_at_risk > risk_limit_zar {
            violations.push(format!(
                "aggregate at-risk {:.2} exceeds dynamic limit {:.2} ({:.2}% of portfolio)",
                total_at_risk, risk_limit_zar, dynamic_limit_pct
            ));
        }

        let available_cash = portfolio.total_value_zar
            - open_positions
                .iter()
                .filter(|p| p.status.is_open())
                .map(|p| p.position_value_zar)
                .sum::<Decimal>();
        if params.position_size_zar > available_cash {
            violations.push(format!(
                "position size {:.2} exceeds available cash {:.2}",
                params.position_size_zar, available_cash
            ));
        }

        let min_position_zar = portfolio.total_value_zar * limits.min_position_size_pct / dec!(100);
        if params.position_size_zar < min_position_zar {
            violations.push(format!(
                "position size {:.2} below minimum floor {:.2} ({:.2}% of portfolio)",
                params.position_size_zar, min_position_zar, limits.min_position_size_pct
            ));
        }

        // 4. Single-position size.
        let single_position_pct = params.position_size_zar / portfolio.total_value_zar * dec!(100);
        metrics.proposed_single_position_pct = single_position_pct;
        if single_position_pct > limits.max_single_position_pct {
            violations.push(format!(
                "position is {:.2}% of portfolio, exceeding {:.2}%",
                single_position_pct, limits.max_single_position_pct
            ));
        }

        // 5. Sector exposure (single crypto sector; all open positions plus this one).
        let existing_exposure: Decimal = open_positions
            .iter()
            .filter(|p| p.status.is_open())
            .map(|p| p.position_value_zar)
            .sum();
        let sector_exposure_pct =
            (existing_exposure + params.position_size_zar) / portfolio.total_value_zar * dec!(100);
        metrics.projected_sector_exposure_pct = sector_exposure_pct;
        if sector_exposure_pct > limits.max_sector_exposure_pct {
            violations.push(format!(
                "sector exposure would be {:.2}%, exceeding {:.2}%",
                sector_exposure_pct, limits.max_sector_exposure_pct
            ));
        }

        // 6. Correlation.
        for position in open_positions.iter().filter(|p| p.status.is_open() && p.pair != pair) {
            if let Some(corr) = self.daily_return_correlation(pair, position.pair).await? {
                if corr.abs() >= limits.max_correlation_threshold {
                    violations.push(format!(
                        "correlation with open {} position is {:.2}, at or above threshold {:.2}",
                        position.pair, corr, limits.max_correlation_threshold
                    ));
                }
            }
        }

        // 7. Leverage.
        let existing_leverage_notional: Decimal = open_positions
            .iter()
            .filter(|p| p.status.is_open())
            .map(|p| p.position_value_zar * p.leverage)
            .sum();
        let leverage_ratio = (existing_leverage_notional + params.position_size_zar * params.leverage)
            / portfolio.total_value_zar;
        metrics.projected_leverage_ratio = leverage_ratio;
        if leverage_ratio > limits.max_leverage {
            violations.push(format!(
                "projected leverage ratio {:.2} exceeds {:.2}",
                leverage_ratio, limits.max_leverage
            ));
        }

        let passed = violations.is_empty();
        if !passed {
            warn!(pair = %pair, violations = ?violations, "portfolio risk manager rejected trade");
        }

        Ok(PortfolioRiskResult {
            passed,
            reason: if passed { None } else { Some(violations.join("; ")) },
            violated_limits: violations,
            metrics,
        })
    }

    /// `[min_risk, max_risk]` clamp of `PortfolioRiskLimits`, scaled
    /// monotonically between the 1.5% and 3% daily-volatility breakpoints.
    fn scale_risk_capacity(volatility_pct: Decimal, limits: &PortfolioRiskLimits) -> Decimal {
        let low_vol = dec!(1.5);
        let high_vol = dec!(3.0);
        if volatility_pct <= low_vol {
            limits.min_dynamic_risk_pct
        } else if volatility_pct >= high_vol {
            limits.max_dynamic_risk_pct
        } else {
            let span = (volatility_pct - low_vol) / (high_vol - low_vol);
            limits.min_dynamic_risk_pct
                + span * (limits.max_dynamic_risk_pct - limits.min_dynamic_risk_pct)
        }
    }

    /// The data model carries no portfolio-value history, only the current
    /// singleton row, so "30-day rolling volatility of portfolio value"
    /// falls straight through to its first documented fallback: BTC's
    /// daily-return volatility, itself falling back to a 1.5% default when
    /// fewer than two daily candles exist.
    async fn forecast_daily_volatility_pct(&self) -> anyhow::Result<Decimal> {
        let candles = self.store.get_recent_candles(Pair::BTCZAR, TimeFrame::D1, 31).await?;
        let returns = daily_returns_pct(&candles);
        if returns.len() < 2 {
            return Ok(dec!(1.5));
        }
        Ok(stddev(&returns))
    }

    async fn daily_return_correlation(&self, a: Pair, b: Pair) -> anyhow::Result<Option<Decimal>> {
        let candles_a = self.store.get_recent_candles(a, TimeFrame::D1, 31).await?;
        let candles_b = self.store.get_recent_candles(b, TimeFrame::D1, 31).await?;
        let returns_a = daily_returns_pct(&candles_a);
        let returns_b = daily_returns_pct(&candles_b);
        let n = returns_a.len().min(returns_b.len());
        if n < 5 {
            return Ok(None);
        }
        Ok(Some(pearson_correlation(&returns_a[..n], &returns_b[..n])))
    }
}

fn daily_returns_pct(candles: &[crate::types::Candle]) -> Vec<Decimal> {
    candles
        .windows(2)
        .filter(|w| !w[0].close.is_zero())
        .map(|w| (w[1].close - w[0].close) / w[0].close * dec!(100))
        .collect()
}

fn stddev(values: &[Decimal]) -> Decimal {
    let n = Decimal::from(values.len() as u64);
    let mean = values.iter().sum::<Decimal>() / n;
    let variance = values.iter().map(|v| (*v - mean) * (*v - mean)).sum::<Decimal>() / n;
    let variance_f64 = variance.to_f64().unwrap_or(0.0);
    Decimal::try_from(variance_f64.sqrt()).unwrap_or(Decimal::ZERO)
}

fn pearson_correlation(a: &[Decimal], b: &[Decimal]) -> Decimal {
    let n = Decimal::from(a.len() as u64);
    let mean_a = a.iter().sum::<Decimal>() / n;
    let mean_b = b.iter().sum::<Decimal>() / n;
    let mut cov = Decimal::ZERO;
    let mut var_a = Decimal::ZERO;
    let mut var_b = Decimal::ZERO;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = *x - mean_a;
        let dy = *y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom_f64 = (var_a.to_f64().unwrap_or(0.0) * var_b.to_f64().unwrap_or(0.0)).sqrt();
    if denom_f64 == 0.0 {
        return Decimal::ZERO;
    }
    let denom = Decimal::try_from(denom_f64).unwrap_or(Decimal::ZERO);
    if denom.is_zero() {
        Decimal::ZERO
    } else {
        cov / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_risk_capacity_clamps_at_breakpoints() {
        let limits = PortfolioRiskLimits::default();
        assert_eq!(
            PortfolioRiskManager::scale_risk_capacity(dec!(1.0), &limits),
            limits.min_dynamic_risk_pct
        );
        assert_eq!(
            PortfolioRiskManager::scale_risk_capacity(dec!(5.0), &limits),
            limits.max_dynamic_risk_pct
        );
    }

    #[test]
    fn scale_risk_capacity_interpolates() {
        let limits = PortfolioRiskLimits::default();
        let mid = PortfolioRiskManager::scale_risk_capacity(dec!(2.25), &limits);
        assert!(mid > limits.min_dynamic_risk_pct && mid < limits.max_dynamic_risk_pct);
    }

    #[test]
    fn pearson_correlation_of_identical_series_is_one() {
        let a = vec![dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)];
        assert_eq!(pearson_correlation(&a, &a), Decimal::ONE);
    }
}
