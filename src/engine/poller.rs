use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::database::Store;
use crate::exchange::ExchangeClient;
use crate::types::Pair;

use super::events::EngineEvent;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const MIN_REQUEST_GAP: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const CRITICAL_ERROR_THRESHOLD: u32 = 5;

/// Polls the public candle endpoint once per minute, per pair, in a
/// strict sequence (never concurrently — `last_seen` updates must stay
/// monotone per pair). Backs off exponentially on repeated failures and
/// always treats HTTP 429 as needing the full 60s clamp.
pub struct CandlePoller {
    exchange: ExchangeClient,
    store: Arc<Store>,
    pairs: Vec<Pair>,
    events: mpsc::Sender<EngineEvent>,
}

impl CandlePoller {
    pub fn new(
        exchange: ExchangeClient,
        store: Arc<Store>,
        pairs: Vec<Pair>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            exchange,
            store,
            pairs,
            events,
        }
    }

    /// Runs until `shutdown` resolves. Intended to be the body of one of
    /// the engine's long-lived tasks.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut last_seen: HashMap<Pair, chrono::DateTime<chrono::Utc>> = HashMap::new();
        let mut consecutive_errors: HashMap<Pair, u32> = HashMap::new();

        loop {
            for &pair in &self.pairs {
                if *shutdown.borrow() {
                    info!("candle poller shutting down");
                    return;
                }

                match self.poll_pair(pair, &mut last_seen).await {
                    Ok(()) => {
                        consecutive_errors.insert(pair, 0);
                    }
                    Err(e) => {
                        let errors = consecutive_errors.entry(pair).or_insert(0);
                        *errors += 1;
                        let is_rate_limited = e.to_string().contains("429");
                        let backoff = if is_rate_limited {
                            MAX_BACKOFF
                        } else {
                            Duration::from_secs(5u64.saturating_mul(2u64.saturating_pow(errors.saturating_sub(1))))
                                .min(MAX_BACKOFF)
                        };

                        if *errors >= CRITICAL_ERROR_THRESHOLD {
                            error!(critical = true, %pair, error = %e, consecutive_errors = errors, "candle poller repeatedly failing");
                        } else {
                            warn!(%pair, error = %e, consecutive_errors = errors, "candle poll failed, backing off");
                        }
                        tokio::time::sleep(backoff).await;
                    }
                }

                tokio::time::sleep(MIN_REQUEST_GAP).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("candle poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn poll_pair(
        &self,
        pair: Pair,
        last_seen: &mut HashMap<Pair, chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<()> {
        let candles = self.exchange.get_recent_candles(pair, 2).await?;
        for candle in candles {
            let is_new = match last_seen.get(&pair) {
                Some(seen) => candle.open_time > *seen,
                None => true,
            };
            if !is_new {
                continue;
            }

            let inserted = self.store.insert_candle_ignore_conflict(&candle).await?;
            last_seen.insert(pair, candle.open_time);
            if inserted {
                debug!(%pair, open_time = %candle.open_time, "new 1m candle ingested");
                if self.events.send(EngineEvent::NewCandle(candle)).await.is_err() {
                    warn!("event channel closed, candle poller stopping delivery");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_clamps_at_sixty_seconds() {
        for errors in 1..10u32 {
            let backoff = Duration::from_secs(5u64.saturating_mul(2u64.saturating_pow(errors - 1))).min(MAX_BACKOFF);
            assert!(backoff <= MAX_BACKOFF);
        }
    }

    #[tokio::test]
    async fn pair_without_prior_state_is_always_new() {
        let mut last_seen: HashMap<Pair, chrono::DateTime<chrono::Utc>> = HashMap::new();
        assert!(last_seen.get(&Pair::BTCZAR).is_none());
        last_seen.insert(Pair::BTCZAR, chrono::Utc::now());
        assert!(last_seen.contains_key(&Pair::BTCZAR));
    }
}
