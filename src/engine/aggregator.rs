use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::Store;
use crate::types::{Candle, Pair, TimeFrame};

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Rolls 1-minute candles up into the higher timeframes on a 5-minute
/// tick. Only ever aggregates a period once it has fully closed, and
/// respects each target timeframe's own cadence so 1h/4h/1d aren't
/// recomputed on every tick for no reason.
pub struct CandleAggregator {
    store: Arc<Store>,
    pairs: Vec<Pair>,
}

impl CandleAggregator {
    pub fn new(store: Arc<Store>, pairs: Vec<Pair>) -> Self {
        Self { store, pairs }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut last_run: HashMap<(Pair, TimeFrame), DateTime<Utc>> = HashMap::new();
        loop {
            for &pair in &self.pairs {
                for &timeframe in TimeFrame::aggregation_targets() {
                    if let Err(e) = self.maybe_aggregate(pair, timeframe, &mut last_run).await {
                        warn!(%pair, %timeframe, error = %e, "candle aggregation failed");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn maybe_aggregate(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
        last_run: &mut HashMap<(Pair, TimeFrame), DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let cadence = timeframe.aggregation_cadence_minutes();
        if cadence > 0 {
            if let Some(last) = last_run.get(&(pair, timeframe)) {
                if now - *last < Duration::minutes(cadence) {
                    return Ok(());
                }
            }
        }

        let minutes = timeframe.to_minutes();
        let period_start = align_down(now, minutes);
        let previous_period_start = period_start - Duration::minutes(minutes);

        let sources = self
            .store
            .get_candles_in_range(pair, TimeFrame::M1, previous_period_start, period_start)
            .await?;
        if sources.is_empty() {
            return Ok(());
        }

        let aggregate = aggregate_candles(pair, timeframe, previous_period_start, &sources);
        self.store.upsert_aggregate_candle(&aggregate).await?;
        last_run.insert((pair, timeframe), now);
        debug!(%pair, %timeframe, open_time = %aggregate.open_time, sources = sources.len(), "aggregated candle upserted");
        Ok(())
    }
}

/// Floors `at` to the most recent UTC boundary that is a multiple of
/// `minutes` since the epoch.
fn align_down(at: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    let period_secs = minutes * 60;
    let floored = (at.timestamp() / period_secs) * period_secs;
    Utc.timestamp_opt(floored, 0).single().unwrap_or(at)
}

fn aggregate_candles(
    pair: Pair,
    timeframe: TimeFrame,
    open_time: DateTime<Utc>,
    sources: &[Candle],
) -> Candle {
    let open = sources.first().map(|c| c.open).unwrap_or_default();
    let close = sources.last().map(|c| c.close).unwrap_or_default();
    let high = sources.iter().map(|c| c.high).fold(open, |acc, h| acc.max(h));
    let low = sources.iter().map(|c| c.low).fold(open, |acc, l| acc.min(l));
    let volume = sources.iter().map(|c| c.volume).sum();
    let num_trades = sources.iter().map(|c| c.num_trades).sum();
    let close_time = sources.last().map(|c| c.close_time).unwrap_or(open_time);

    Candle {
        pair,
        timeframe,
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        num_trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: DateTime<Utc>, open: rust_decimal::Decimal, close: rust_decimal::Decimal) -> Candle {
        Candle {
            pair: Pair::BTCZAR,
            timeframe: TimeFrame::M1,
            open_time,
            close_time: open_time + Duration::minutes(1),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: dec!(1),
            num_trades: 1,
        }
    }

    #[test]
    fn align_down_floors_to_timeframe_boundary() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 7, 30).unwrap();
        let floored = align_down(at, 5);
        assert_eq!(floored, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn aggregate_uses_first_open_last_close_and_extreme_high_low() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let sources = vec![
            candle(base, dec!(100), dec!(105)),
            candle(base + Duration::minutes(1), dec!(105), dec!(95)),
            candle(base + Duration::minutes(2), dec!(95), dec!(110)),
        ];
        let agg = aggregate_candles(Pair::BTCZAR, TimeFrame::M5, base, &sources);
        assert_eq!(agg.open, dec!(100));
        assert_eq!(agg.close, dec!(110));
        assert_eq!(agg.high, dec!(110));
        assert_eq!(agg.low, dec!(95));
        assert_eq!(agg.volume, dec!(3));
    }
}
