use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Signal3, FEATURE_VECTOR_WIDTH};

/// Weights for a 3-class (BUY/SELL/HOLD) softmax scorer over the 90-wide
/// feature vector. Fitting these is out of scope for this core — they are
/// supplied (trained offline, wherever that pipeline lives) and loaded
/// through [`super::persistence::ModelPersistence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    /// `(90, 3)`: one column of coefficients per class.
    coefficients: Vec<[f64; 3]>,
    intercepts: [f64; 3],
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
}

impl ModelWeights {
    pub fn validate(&self) -> Result<()> {
        if self.coefficients.len() != FEATURE_VECTOR_WIDTH
            || self.feature_means.len() != FEATURE_VECTOR_WIDTH
            || self.feature_stds.len() != FEATURE_VECTOR_WIDTH
        {
            return Err(anyhow!(
                "model weights do not match the {}-wide feature contract",
                FEATURE_VECTOR_WIDTH
            ));
        }
        Ok(())
    }
}

/// Multinomial scorer: a 90-wide feature vector in, a (p_buy, p_sell,
/// p_hold) probability triple out. Stateless and cheap — every prediction
/// normalizes the input with the stored feature means/stds before scoring.
pub struct MultinomialModel {
    weights: ModelWeights,
}

impl MultinomialModel {
    pub fn from_weights(weights: ModelWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn predict_proba(&self, features: &[f64]) -> Result<(f64, f64, f64)> {
        if features.len() != FEATURE_VECTOR_WIDTH {
            return Err(anyhow!(
                "expected a {}-wide feature vector, got {}",
                FEATURE_VECTOR_WIDTH,
                features.len()
            ));
        }

        let normalized: Array1<f64> = (0..FEATURE_VECTOR_WIDTH)
            .map(|i| {
                let std = self.weights.feature_stds[i];
                if std > 1e-10 {
                    (features[i] - self.weights.feature_means[i]) / std
                } else {
                    0.0
                }
            })
            .collect();

        let coefficients: Array2<f64> = Array2::from_shape_vec(
            (FEATURE_VECTOR_WIDTH, 3),
            self.weights.coefficients.iter().flatten().copied().collect(),
        )?;

        let mut logits = self.weights.intercepts;
        for class in 0..3 {
            let column = coefficients.column(class);
            logits[class] += normalized.dot(&column);
        }

        let (p_buy, p_sell, p_hold) = softmax3(logits);
        debug!(p_buy, p_sell, p_hold, "multinomial model scored feature vector");
        Ok((p_buy, p_sell, p_hold))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.weights)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let weights: ModelWeights = serde_json::from_str(json)?;
        Self::from_weights(weights)
    }
}

fn softmax3(logits: [f64; 3]) -> (f64, f64, f64) {
    let max = logits[0].max(logits[1]).max(logits[2]);
    let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    if sum == 0.0 {
        return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
    }
    (exp[0] / sum, exp[1] / sum, exp[2] / sum)
}

/// `Signal3::Hold`-biased starting weights — a safe zero-information
/// default until a trained model is activated in the store.
pub fn hold_biased_default_weights() -> ModelWeights {
    ModelWeights {
        coefficients: vec![[0.0, 0.0, 0.0]; FEATURE_VECTOR_WIDTH],
        intercepts: [0.0, 0.0, 1.0],
        feature_means: vec![0.0; FEATURE_VECTOR_WIDTH],
        feature_stds: vec![1.0; FEATURE_VECTOR_WIDTH],
    }
}

pub fn class_from_probabilities(p_buy: f64, p_sell: f64, p_hold: f64) -> Signal3 {
    if p_buy >= p_sell && p_buy >= p_hold {
        Signal3::Buy
    } else if p_sell >= p_buy && p_sell >= p_hold {
        Signal3::Sell
    } else {
        Signal3::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_favor_hold() {
        let model = MultinomialModel::from_weights(hold_biased_default_weights()).unwrap();
        let features = vec![0.0; FEATURE_VECTOR_WIDTH];
        let (p_buy, p_sell, p_hold) = model.predict_proba(&features).unwrap();
        assert!(p_hold > p_buy && p_hold > p_sell);
    }

    #[test]
    fn rejects_mismatched_feature_width() {
        let model = MultinomialModel::from_weights(hold_biased_default_weights()).unwrap();
        assert!(model.predict_proba(&[0.0; 10]).is_err());
    }

    #[test]
    fn roundtrips_through_json() {
        let model = MultinomialModel::from_weights(hold_biased_default_weights()).unwrap();
        let json = model.to_json().unwrap();
        let reloaded = MultinomialModel::from_json(&json).unwrap();
        let features = vec![0.1; FEATURE_VECTOR_WIDTH];
        assert_eq!(
            model.predict_proba(&features).unwrap(),
            reloaded.predict_proba(&features).unwrap()
        );
    }
}
