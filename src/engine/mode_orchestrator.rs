use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::database::Store;
use crate::types::{ModeHistoryEntry, ModeState, TradingMode};

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("switching to LIVE requires confirmed=true")]
    LiveRequiresConfirmation,
}

/// The result of a `set_mode` call: whether a transition actually
/// happened, and the mode state afterward.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModeChangeOutcome {
    pub changed: bool,
    pub state: ModeState,
}

/// Owns the mode singleton. `get_current_mode` is called on every order —
/// the execution router never caches this value across calls, since the
/// mode is hot-swappable mid-session.
pub struct ModeOrchestrator {
    store: Arc<Store>,
}

impl ModeOrchestrator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn get_current_mode(&self) -> anyhow::Result<TradingMode> {
        Ok(self.store.get_mode_state().await?.current_mode)
    }

    pub async fn get_mode_state(&self) -> anyhow::Result<ModeState> {
        self.store.get_mode_state().await
    }

    pub async fn get_mode_history(&self, limit: i64) -> anyhow::Result<Vec<ModeHistoryEntry>> {
        self.store.get_mode_history(limit).await
    }

    /// Switching to LIVE requires `confirmed=true`; switching to the
    /// *current* mode is a no-op that writes no history row, matching
    /// `"Already in {new_mode} mode, no change needed"` upstream.
    pub async fn set_mode(
        &self,
        new_mode: TradingMode,
        confirmed: bool,
        reason: String,
    ) -> anyhow::Result<ModeChangeOutcome> {
        if matches!(new_mode, TradingMode::Live) && !confirmed {
            return Err(ModeError::LiveRequiresConfirmation.into());
        }

        let current = self.store.get_mode_state().await?;
        if current.current_mode == new_mode {
            return Ok(ModeChangeOutcome {
                changed: false,
                state: current,
            });
        }

        let new_state = ModeState {
            current_mode: new_mode,
            last_changed_at: chrono::Utc::now(),
            changed_by: "operator".to_string(),
            reason: reason.clone(),
        };
        self.store.save_mode_state(&new_state).await?;
        self.store
            .insert_mode_history(&ModeHistoryEntry {
                from_mode: current.current_mode,
                to_mode: new_mode,
                changed_at: new_state.last_changed_at,
                reason,
            })
            .await?;

        warn!(from = %current.current_mode, to = %new_mode, "trading mode changed");
        Ok(ModeChangeOutcome {
            changed: true,
            state: new_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Arc<Store> {
        Arc::new(Store::new("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn boots_in_paper_mode() {
        let orchestrator = ModeOrchestrator::new(test_store().await);
        assert_eq!(orchestrator.get_current_mode().await.unwrap(), TradingMode::Paper);
    }

    #[tokio::test]
    async fn live_without_confirmation_is_rejected() {
        let orchestrator = ModeOrchestrator::new(test_store().await);
        let err = orchestrator
            .set_mode(TradingMode::Live, false, "going live".to_string())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("confirmed"));
        assert_eq!(orchestrator.get_current_mode().await.unwrap(), TradingMode::Paper);
    }

    #[tokio::test]
    async fn setting_same_mode_writes_no_history() {
        let orchestrator = ModeOrchestrator::new(test_store().await);
        let outcome = orchestrator
            .set_mode(TradingMode::Paper, false, "no-op".to_string())
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert!(orchestrator.get_mode_history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmed_live_switch_writes_history() {
        let orchestrator = ModeOrchestrator::new(test_store().await);
        let outcome = orchestrator
            .set_mode(TradingMode::Live, true, "operator confirmed".to_string())
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(orchestrator.get_mode_history(10).await.unwrap().len(), 1);
    }
}
