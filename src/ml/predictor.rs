use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::model::{hold_biased_default_weights, MultinomialModel};
use super::persistence::{ModelPersistence, ModelType};
use crate::database::Store;
use crate::types::{Pair, Prediction};

/// The external boundary the core consumes: synchronously answer `{class,
/// probabilities, confidence, model_version, timestamp}` for a pair. The
/// predictor reads its own feature vector from the store — callers never
/// supply one — and is the only place confidence is computed; gating on it
/// is the risk sizer's job, not this trait's.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, pair: Pair) -> anyhow::Result<Prediction>;
}

/// Loads the active multinomial model from the store at construction time
/// and keeps it in memory; falls back to a hold-biased zero-information
/// model when no trained model has been activated yet, so the pipeline
/// always has an answer rather than erroring on a cold store.
pub struct DefaultPredictor {
    store: Arc<Store>,
    model: RwLock<MultinomialModel>,
    model_version: RwLock<String>,
}

impl DefaultPredictor {
    pub async fn new(store: Arc<Store>, persistence: &ModelPersistence) -> anyhow::Result<Self> {
        let (model, version) = Self::load_active(persistence).await;
        Ok(Self {
            store,
            model: RwLock::new(model),
            model_version: RwLock::new(version),
        })
    }

    async fn load_active(persistence: &ModelPersistence) -> (MultinomialModel, String) {
        let active = persistence.get_active_model(ModelType::LogisticRegression).await;
        match active {
            Ok(Some(record)) => {
                match persistence.load_model(record.model_type, &record.version).await {
                    Ok(bytes) => match String::from_utf8(bytes).ok().and_then(|json| {
                        MultinomialModel::from_json(&json).ok()
                    }) {
                        Some(model) => return (model, record.version.as_string()),
                        None => tracing::warn!(
                            version = %record.version,
                            "active model failed to parse, falling back to default weights"
                        ),
                    },
                    Err(e) => tracing::warn!(error = %e, "failed to load active model from disk"),
                }
            }
            Ok(None) => tracing::debug!("no active model in store, using default weights"),
            Err(e) => tracing::warn!(error = %e, "failed to query active model"),
        }
        (
            MultinomialModel::from_weights(hold_biased_default_weights())
                .expect("default weights are always well-formed"),
            "0.0.0-default".to_string(),
        )
    }

    /// Swaps in a freshly activated model without restarting the process.
    pub async fn reload(&self, persistence: &ModelPersistence) {
        let (model, version) = Self::load_active(persistence).await;
        *self.model.write().await = model;
        *self.model_version.write().await = version;
    }
}

#[async_trait]
impl Predictor for DefaultPredictor {
    async fn predict(&self, pair: Pair) -> anyhow::Result<Prediction> {
        let feature_vector = self
            .store
            .get_latest_feature_vector(pair)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no feature vector available for {}", pair))?;

        let model = self.model.read().await;
        let (p_buy, p_sell, p_hold) = model.predict_proba(&feature_vector.values)?;
        drop(model);

        let model_version = self.model_version.read().await.clone();
        let prediction = Prediction::new(pair, model_version, p_buy, p_sell, p_hold);

        self.store.insert_prediction(&prediction).await?;
        Ok(prediction)
    }
}
