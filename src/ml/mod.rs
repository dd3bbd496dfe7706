pub mod features;
pub mod model;
pub mod persistence;
pub mod predictor;

pub use features::FeatureEngineer;
pub use model::{class_from_probabilities, hold_biased_default_weights, ModelWeights, MultinomialModel};
pub use predictor::{DefaultPredictor, Predictor};
