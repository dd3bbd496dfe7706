use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Single-row table; `total_value_zar = 0` (missing row) is treated by
/// callers as "no capacity" rather than a divide-by-zero — see the
/// Portfolio Risk Manager's capacity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub total_value_zar: Decimal,
    pub peak_value_zar: Decimal,
    pub current_drawdown_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl PortfolioState {
    pub fn initial(starting_value_zar: Decimal) -> Self {
        Self {
            total_value_zar: starting_value_zar,
            peak_value_zar: starting_value_zar,
            current_drawdown_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    /// Applies a realized P&L: total is adjusted, peak is `max(peak,
    /// total)`, and drawdown is recomputed monotonically in max.
    pub fn apply_pnl(&mut self, pnl_zar: Decimal) {
        self.total_value_zar += pnl_zar;
        self.peak_value_zar = self.peak_value_zar.max(self.total_value_zar);
        self.current_drawdown_pct = if self.peak_value_zar.is_zero() {
            Decimal::ZERO
        } else {
            (self.peak_value_zar - self.total_value_zar) / self.peak_value_zar * Decimal::from(100)
        };
        self.max_drawdown_pct = self.max_drawdown_pct.max(self.current_drawdown_pct);
        self.last_updated = Utc::now();
    }
}
