#![allow(dead_code)]
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use super::runtime::{
    GeneralSettings, LiveSafetyLimits, PortfolioRiskLimits, RiskSizerSettings, RuntimeConfig,
    StrategicGateSettings,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ConfigChangeEvent {
    RiskSizerUpdated,
    PortfolioRiskUpdated,
    LiveSafetyUpdated,
    StrategicGateUpdated,
    GeneralUpdated,
    FullConfigUpdated,
}

/// Holds the live `RuntimeConfig` behind a lock and broadcasts changes.
/// Every setter snapshots the previous sub-config, applies the new one,
/// revalidates the whole config, and reverts on failure — callers only
/// ever observe a config in a state that has passed `validate()`.
pub struct RuntimeConfigManager {
    config: Arc<RwLock<RuntimeConfig>>,
    tx: broadcast::Sender<ConfigChangeEvent>,
}

impl RuntimeConfigManager {
    pub fn new(initial: RuntimeConfig) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(initial)),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.tx.subscribe()
    }

    pub async fn snapshot(&self) -> RuntimeConfig {
        self.config.read().await.clone()
    }

    pub async fn update_risk_sizer(&self, new: RiskSizerSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.risk_sizer.clone();
        config.risk_sizer = new;
        if let Err(errors) = config.validate() {
            config.risk_sizer = previous;
            return Err(errors.join(", "));
        }
        info!("risk sizer settings updated");
        let _ = self.tx.send(ConfigChangeEvent::RiskSizerUpdated);
        Ok(())
    }

    pub async fn update_portfolio_risk(&self, new: PortfolioRiskLimits) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.portfolio_risk.clone();
        config.portfolio_risk = new;
        if let Err(errors) = config.validate() {
            config.portfolio_risk = previous;
            return Err(errors.join(", "));
        }
        info!("portfolio risk limits updated");
        let _ = self.tx.send(ConfigChangeEvent::PortfolioRiskUpdated);
        Ok(())
    }

    pub async fn update_live_safety(&self, new: LiveSafetyLimits) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.live_safety.clone();
        config.live_safety = new;
        if let Err(errors) = config.validate() {
            config.live_safety = previous;
            return Err(errors.join(", "));
        }
        info!("live safety limits updated");
        let _ = self.tx.send(ConfigChangeEvent::LiveSafetyUpdated);
        Ok(())
    }

    pub async fn update_strategic_gate(&self, new: StrategicGateSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous_enabled = config.strategic_gate.enabled;
        config.strategic_gate = new;
        if let Err(errors) = config.validate() {
            config.strategic_gate.enabled = previous_enabled;
            return Err(errors.join(", "));
        }
        info!(enabled = config.strategic_gate.enabled, "strategic gate settings updated");
        let _ = self.tx.send(ConfigChangeEvent::StrategicGateUpdated);
        Ok(())
    }

    pub async fn update_general(&self, new: GeneralSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.general.clone();
        config.general = new;
        if let Err(errors) = config.validate() {
            config.general = previous;
            return Err(errors.join(", "));
        }
        info!("general settings updated");
        let _ = self.tx.send(ConfigChangeEvent::GeneralUpdated);
        Ok(())
    }
}
