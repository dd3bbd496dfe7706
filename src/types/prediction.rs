use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Pair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal3 {
    Buy,
    Sell,
    Hold,
}

impl Signal3 {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal3::Buy => "BUY",
            Signal3::Sell => "SELL",
            Signal3::Hold => "HOLD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Signal3::Buy),
            "SELL" => Some(Signal3::Sell),
            "HOLD" => Some(Signal3::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Signal3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The predictor's synchronous answer for a pair: a class plus the full
/// probability triple it was drawn from. `confidence` is always the max
/// of the three probabilities, by convention — never independently set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub pair: Pair,
    pub model_version: String,
    pub class: Signal3,
    pub p_buy: f64,
    pub p_sell: f64,
    pub p_hold: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    pub fn new(pair: Pair, model_version: String, p_buy: f64, p_sell: f64, p_hold: f64) -> Self {
        let class = if p_buy >= p_sell && p_buy >= p_hold {
            Signal3::Buy
        } else if p_sell >= p_buy && p_sell >= p_hold {
            Signal3::Sell
        } else {
            Signal3::Hold
        };
        let confidence = p_buy.max(p_sell).max(p_hold);
        Self {
            pair,
            model_version,
            class,
            p_buy,
            p_sell,
            p_hold,
            confidence,
            created_at: Utc::now(),
        }
    }
}
