use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Pair;

/// Everything the pipeline and its gates read at runtime, adjustable
/// without a restart via the config manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub risk_sizer: RiskSizerSettings,
    pub portfolio_risk: PortfolioRiskLimits,
    pub live_safety: LiveSafetyLimits,
    pub strategic_gate: StrategicGateSettings,
    pub general: GeneralSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            risk_sizer: RiskSizerSettings::default(),
            portfolio_risk: PortfolioRiskLimits::default(),
            live_safety: LiveSafetyLimits::default(),
            strategic_gate: StrategicGateSettings::default(),
            general: GeneralSettings::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        errors.extend(self.risk_sizer.validate());
        errors.extend(self.portfolio_risk.validate());
        errors.extend(self.live_safety.validate());
        if self.general.pairs.is_empty() {
            errors.push("general.pairs must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Tier 3 — Risk Sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSizerSettings {
    pub min_confidence: Decimal,
    pub max_position_fraction: Decimal,
    pub kelly_fraction: Decimal,
    pub default_stop_loss_pct: Decimal,
    pub default_take_profit_pct: Decimal,
}

impl Default for RiskSizerSettings {
    fn default() -> Self {
        Self {
            min_confidence: dec!(0.40),
            max_position_fraction: dec!(0.20),
            kelly_fraction: dec!(0.5),
            default_stop_loss_pct: dec!(2),
            default_take_profit_pct: dec!(4),
        }
    }
}

impl RiskSizerSettings {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_confidence <= Decimal::ZERO || self.min_confidence >= Decimal::ONE {
            errors.push("risk_sizer.min_confidence must be in (0, 1)".to_string());
        }
        if self.max_position_fraction <= Decimal::ZERO || self.max_position_fraction > Decimal::ONE {
            errors.push("risk_sizer.max_position_fraction must be in (0, 1]".to_string());
        }
        errors
    }
}

/// Tier 5 — Portfolio Risk Manager's 7 checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRiskLimits {
    pub max_drawdown_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub max_single_position_pct: Decimal,
    pub max_sector_exposure_pct: Decimal,
    pub max_correlation_threshold: Decimal,
    pub max_leverage: Decimal,
    pub min_dynamic_risk_pct: Decimal,
    pub max_dynamic_risk_pct: Decimal,
    pub min_position_size_pct: Decimal,
}

impl Default for PortfolioRiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown_pct: dec!(15),
            daily_loss_limit_pct: dec!(5),
            max_single_position_pct: dec!(20),
            max_sector_exposure_pct: dec!(60),
            max_correlation_threshold: dec!(0.90),
            max_leverage: dec!(3.0),
            min_dynamic_risk_pct: dec!(25),
            max_dynamic_risk_pct: dec!(50),
            min_position_size_pct: dec!(5),
        }
    }
}

impl PortfolioRiskLimits {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_drawdown_pct <= Decimal::ZERO || self.max_drawdown_pct > Decimal::from(100) {
            errors.push("portfolio_risk.max_drawdown_pct must be in (0, 100]".to_string());
        }
        if self.min_dynamic_risk_pct > self.max_dynamic_risk_pct {
            errors.push("portfolio_risk.min_dynamic_risk_pct must be <= max_dynamic_risk_pct".to_string());
        }
        errors
    }
}

/// Live Safety Gates (§4.12); only evaluated when the mode is LIVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSafetyLimits {
    pub min_order_value_zar: Decimal,
    pub max_order_size_zar: Decimal,
    pub max_daily_trades: u32,
    pub balance_buffer_pct: Decimal,
    pub max_position_exposure_pct: Decimal,
    /// Taker fee charged on the entry fill, added to the balance-sufficiency
    /// check alongside `balance_buffer_pct`.
    pub fee_pct: Decimal,
}

impl Default for LiveSafetyLimits {
    fn default() -> Self {
        Self {
            min_order_value_zar: dec!(100),
            max_order_size_zar: dec!(10000),
            max_daily_trades: 50,
            balance_buffer_pct: dec!(5),
            max_position_exposure_pct: dec!(30),
            fee_pct: dec!(0.1),
        }
    }
}

impl LiveSafetyLimits {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_order_value_zar >= self.max_order_size_zar {
            errors.push("live_safety.min_order_value_zar must be < max_order_size_zar".to_string());
        }
        if self.max_daily_trades == 0 {
            errors.push("live_safety.max_daily_trades must be > 0".to_string());
        }
        errors
    }
}

/// Tier 4 — Strategic Gate; a no-op pass-through when `enabled=false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicGateSettings {
    pub enabled: bool,
    pub llm_timeout_secs: u64,
    pub model: String,
}

impl Default for StrategicGateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            llm_timeout_secs: 30,
            model: "claude-3-5-sonnet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub pairs: Vec<Pair>,
    pub initial_balance_zar: Decimal,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            pairs: Pair::all(),
            initial_balance_zar: dec!(100000),
        }
    }
}
