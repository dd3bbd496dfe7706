#![allow(dead_code)]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A traded symbol, `base ∥ quote`. The core is parameterized over this
/// finite set; adding a pair means adding a variant and its static facts
/// below, not touching the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pair {
    BTCZAR,
    ETHZAR,
    SOLZAR,
}

impl Pair {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pair::BTCZAR => "BTCZAR",
            Pair::ETHZAR => "ETHZAR",
            Pair::SOLZAR => "SOLZAR",
        }
    }

    pub fn base_asset(&self) -> &'static str {
        match self {
            Pair::BTCZAR => "BTC",
            Pair::ETHZAR => "ETH",
            Pair::SOLZAR => "SOL",
        }
    }

    pub fn quote_asset(&self) -> &'static str {
        "ZAR"
    }

    pub fn all() -> Vec<Pair> {
        vec![Pair::BTCZAR, Pair::ETHZAR, Pair::SOLZAR]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTCZAR" => Some(Pair::BTCZAR),
            "ETHZAR" => Some(Pair::ETHZAR),
            "SOLZAR" => Some(Pair::SOLZAR),
            _ => None,
        }
    }

    /// Grouping used by the portfolio risk manager's correlation check;
    /// BTC is its own group since it anchors the other two.
    pub fn correlation_group(&self) -> &'static str {
        match self {
            Pair::BTCZAR => "btc",
            Pair::ETHZAR | Pair::SOLZAR => "alt",
        }
    }

    pub fn price_precision(&self) -> u32 {
        match self {
            Pair::BTCZAR => 0,
            Pair::ETHZAR => 2,
            Pair::SOLZAR => 2,
        }
    }

    pub fn quantity_precision(&self) -> u32 {
        match self {
            Pair::BTCZAR => 6,
            Pair::ETHZAR => 5,
            Pair::SOLZAR => 3,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for BUY, -1 for SELL; used to sign P&L and exposure math.
    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::H4 => "4h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TimeFrame::M1),
            "5m" => Some(TimeFrame::M5),
            "15m" => Some(TimeFrame::M15),
            "1h" => Some(TimeFrame::H1),
            "4h" => Some(TimeFrame::H4),
            "1d" => Some(TimeFrame::D1),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> i64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
            TimeFrame::H4 => 240,
            TimeFrame::D1 => 1440,
        }
    }

    /// Higher timeframes the aggregator rolls 1m candles into.
    pub fn aggregation_targets() -> &'static [TimeFrame] {
        &[
            TimeFrame::M5,
            TimeFrame::M15,
            TimeFrame::H1,
            TimeFrame::H4,
            TimeFrame::D1,
        ]
    }

    /// Minimum minutes between aggregation attempts for this target timeframe.
    pub fn aggregation_cadence_minutes(&self) -> i64 {
        match self {
            TimeFrame::M5 | TimeFrame::M15 => 0,
            TimeFrame::H1 => 15,
            TimeFrame::H4 | TimeFrame::D1 => 60,
            TimeFrame::M1 => 0,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
