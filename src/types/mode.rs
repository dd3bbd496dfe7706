use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "PAPER",
            TradingMode::Live => "LIVE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PAPER" => Some(TradingMode::Paper),
            "LIVE" => Some(TradingMode::Live),
            _ => None,
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Singleton row; read on every trade decision, never cached across events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeState {
    pub current_mode: TradingMode,
    pub last_changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub reason: String,
}

impl ModeState {
    pub fn initial() -> Self {
        Self {
            current_mode: TradingMode::Paper,
            last_changed_at: Utc::now(),
            changed_by: "system".to_string(),
            reason: "initial boot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeHistoryEntry {
    pub from_mode: TradingMode,
    pub to_mode: TradingMode,
    pub changed_at: DateTime<Utc>,
    pub reason: String,
}
