use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const TIER_FAILURE_CRITICAL_THRESHOLD: u32 = 3;

/// Capped exponential backoff for reconnect loops: `2^(n-1)`s, clamped
/// to 60s. `PriceStream` and `AccountStream` already run their own
/// reconnect loops with this shape baked in; this helper is for any
/// future caller (and the health monitor's own reconnect-on-demand path)
/// that needs the same policy without duplicating the formula.
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(1)).min(60);
    Duration::from_secs(secs.max(1))
}

/// Per-component health tracking for the engine's tiers (predictor, risk
/// sizer, strategic gate, portfolio risk manager, position manager, ...).
/// A component crossing the critical threshold gets a critical log; it
/// does not by itself stop the engine — `reinitialize` is how a caller
/// clears a tier's failure count after rebuilding it.
pub struct TierRecovery {
    failures: RwLock<HashMap<String, Arc<AtomicU32>>>,
}

impl TierRecovery {
    pub fn new() -> Self {
        Self {
            failures: RwLock::new(HashMap::new()),
        }
    }

    async fn counter(&self, component: &str) -> Arc<AtomicU32> {
        if let Some(counter) = self.failures.read().await.get(component) {
            return counter.clone();
        }
        let mut guard = self.failures.write().await;
        guard
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    /// Records a failed call for `component`. Returns the new consecutive
    /// failure count.
    pub async fn record_failure(&self, component: &str) -> u32 {
        let counter = self.counter(component).await;
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= TIER_FAILURE_CRITICAL_THRESHOLD {
            error!(critical = true, component, consecutive_failures = count, "tier repeatedly failing");
        } else {
            warn!(component, consecutive_failures = count, "tier call failed");
        }
        count
    }

    pub async fn record_success(&self, component: &str) {
        self.counter(component).await.store(0, Ordering::SeqCst);
    }

    pub async fn is_healthy(&self, component: &str) -> bool {
        self.counter(component).await.load(Ordering::SeqCst) < TIER_FAILURE_CRITICAL_THRESHOLD
    }

    /// Clears a component's failure count after it has been rebuilt —
    /// the engine owns tier instances by value, so "reinitializing" a
    /// tier in practice means constructing a fresh one and calling this
    /// to reset its health state.
    pub async fn reinitialize(&self, component: &str) {
        self.counter(component).await.store(0, Ordering::SeqCst);
        info!(component, "tier health state reset after reinitialization");
    }
}

impl Default for TierRecovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_clamps() {
        assert_eq!(reconnect_backoff(1), Duration::from_secs(1));
        assert_eq!(reconnect_backoff(2), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(7), Duration::from_secs(60));
        assert_eq!(reconnect_backoff(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn three_consecutive_failures_mark_component_unhealthy() {
        let recovery = TierRecovery::new();
        assert!(recovery.is_healthy("predictor").await);
        recovery.record_failure("predictor").await;
        recovery.record_failure("predictor").await;
        assert!(recovery.is_healthy("predictor").await);
        recovery.record_failure("predictor").await;
        assert!(!recovery.is_healthy("predictor").await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let recovery = TierRecovery::new();
        recovery.record_failure("sizer").await;
        recovery.record_failure("sizer").await;
        recovery.record_success("sizer").await;
        assert!(recovery.is_healthy("sizer").await);
    }
}
