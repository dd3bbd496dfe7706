use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Pair, Signal3};

/// Serialized to the `rejected_by` column as its VARCHAR name. Every
/// stage that can terminate a candidate trade short of execution has
/// its own variant so the decision row names exactly where it died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionStage {
    Tier3RiskSizer,
    Tier4Llm,
    Tier5PortfolioRisk,
    Tier5PortfolioRiskRecheck,
    Tier5ExecutionFailed,
}

impl RejectionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionStage::Tier3RiskSizer => "TIER3_RISK_SIZER",
            RejectionStage::Tier4Llm => "TIER4_LLM",
            RejectionStage::Tier5PortfolioRisk => "TIER5_PORTFOLIO_RISK",
            RejectionStage::Tier5PortfolioRiskRecheck => "TIER5_PORTFOLIO_RISK_RECHECK",
            RejectionStage::Tier5ExecutionFailed => "TIER5_EXECUTION_FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TIER3_RISK_SIZER" => Some(RejectionStage::Tier3RiskSizer),
            "TIER4_LLM" => Some(RejectionStage::Tier4Llm),
            "TIER5_PORTFOLIO_RISK" => Some(RejectionStage::Tier5PortfolioRisk),
            "TIER5_PORTFOLIO_RISK_RECHECK" => Some(RejectionStage::Tier5PortfolioRiskRecheck),
            "TIER5_EXECUTION_FAILED" => Some(RejectionStage::Tier5ExecutionFailed),
            _ => None,
        }
    }
}

impl fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per pipeline attempt, inserted before execution and updated
/// in place as the candidate moves through the tiers. Exactly one of
/// `executed` or `rejected_by.is_some()` must eventually hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub id: i64,
    pub pair: Pair,
    pub signal: Signal3,
    pub ml_confidence: f64,
    pub position_size_zar: Decimal,
    pub leverage: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub executed: bool,
    pub execution_id: Option<String>,
    pub rejected_by: Option<RejectionStage>,
    pub rejection_reason: Option<String>,
    pub llm_rejection_reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RiskDecision {
    pub fn is_terminal(&self) -> bool {
        self.executed || self.rejected_by.is_some()
    }

    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now - self.created_at <= chrono::Duration::hours(24)
    }
}
