use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Produced by the Risk Sizer, consumed unchanged by later tiers unless
/// the Strategic Gate modifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeParameters {
    pub position_size_zar: Decimal,
    pub leverage: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub max_loss_zar: Decimal,
    pub expected_gain_zar: Decimal,
}

impl TradeParameters {
    /// Applies the Strategic Gate's MODIFY multiplier (clamped to [0, 2])
    /// to the size-dependent fields, leaving percentages untouched unless
    /// the gate supplies explicit overrides.
    pub fn scaled(&self, multiplier: Decimal) -> Self {
        let multiplier = multiplier.clamp(Decimal::ZERO, Decimal::from(2));
        Self {
            position_size_zar: self.position_size_zar * multiplier,
            leverage: self.leverage,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            max_loss_zar: self.max_loss_zar * multiplier,
            expected_gain_zar: self.expected_gain_zar * multiplier,
        }
    }
}
