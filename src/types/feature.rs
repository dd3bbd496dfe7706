use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Pair;

/// Ninety ordered floats plus their parallel names, computed for one
/// `(pair, computed_at)`. The core treats the values as opaque — it
/// persists and retrieves them but never interprets an individual slot;
/// that belongs to the feature engineer and the predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub pair: Pair,
    pub computed_at: DateTime<Utc>,
    pub values: Vec<f64>,
    pub names: Vec<String>,
}

pub const FEATURE_VECTOR_WIDTH: usize = 90;

impl FeatureVector {
    pub fn new(pair: Pair, computed_at: DateTime<Utc>, values: Vec<f64>, names: Vec<String>) -> Self {
        Self {
            pair,
            computed_at,
            values,
            names,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.values.len() == FEATURE_VECTOR_WIDTH && self.names.len() == self.values.len()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }
}
