use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{EngineConfig, RuntimeConfigManager};
use crate::database::Store;
use crate::engine::{Engine, ModeOrchestrator};

/// Shared application state for the control surface. The engine itself
/// is created lazily by `POST /engine/start` — the slot starts empty so
/// the process can come up and serve `/mode/*` and health checks before
/// an operator decides to launch trading. Mode is a property of the
/// store, not the engine, so it is reachable in both states.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub store: Arc<Store>,
    pub runtime_config: Arc<RuntimeConfigManager>,
    pub mode_orchestrator: Arc<ModeOrchestrator>,
    pub engine: Arc<RwLock<Option<Arc<Engine>>>>,
}

impl AppState {
    pub fn new(config: Arc<EngineConfig>, store: Arc<Store>, runtime_config: Arc<RuntimeConfigManager>) -> Self {
        let mode_orchestrator = Arc::new(ModeOrchestrator::new(store.clone()));
        Self {
            config,
            store,
            runtime_config,
            mode_orchestrator,
            engine: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn running_engine(&self) -> Option<Arc<Engine>> {
        self.engine.read().await.clone()
    }
}
