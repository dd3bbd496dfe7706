use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::types::Pair;

/// A single real-time price tick for one pair.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub pair: Pair,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Subscribes to `MARKET_SUMMARY_UPDATE` on the public market-data WebSocket
/// for the given pairs and forwards each tick to `tx`. Reconnects on its own
/// with capped exponential backoff; the caller only ever sees a stream of
/// ticks, never a disconnect.
///
/// `tx` is a bounded channel: sends use `try_send` so a slow consumer never
/// stalls the socket reader — a full channel means the update is dropped,
/// not queued.
pub struct PriceStream {
    ws_base_url: String,
    pairs: Vec<Pair>,
    connected: Arc<AtomicBool>,
}

impl PriceStream {
    pub fn new(ws_base_url: String, pairs: Vec<Pair>) -> Self {
        Self {
            ws_base_url,
            pairs,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares the connection flag with the caller before `spawn` consumes
    /// `self`, so the health monitor can observe it without owning the
    /// stream.
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn spawn(self, tx: mpsc::Sender<PriceTick>) {
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match self.run_once(&tx).await {
                    Ok(()) => {
                        info!("price stream connection closed cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        attempt += 1;
                        error!(error = %e, attempt, "price stream connection failed");
                    }
                }
                self.connected.store(false, Ordering::Relaxed);
                let backoff_secs = 2u64.saturating_pow(attempt.saturating_sub(1)).min(60);
                tokio::time::sleep(tokio::time::Duration::from_secs(backoff_secs.max(1))).await;
            }
        });
    }

    async fn run_once(&self, tx: &mpsc::Sender<PriceTick>) -> anyhow::Result<()> {
        let url = format!("{}/ws/trade", self.ws_base_url);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "type": "SUBSCRIBE",
            "subscriptions": [{
                "event": "MARKET_SUMMARY_UPDATE",
                "pairs": self.pairs.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            }],
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        self.connected.store(true, Ordering::Relaxed);
        info!(pairs = ?self.pairs, "price stream subscribed");

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(tick) = Self::parse_tick(&text) {
                        if tx.try_send(tick).is_err() {
                            debug!("price event channel full or closed, dropping tick");
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    warn!("price stream closed by server");
                    break;
                }
                Err(e) => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_tick(text: &str) -> Option<PriceTick> {
        let envelope: MarketSummaryEnvelope = serde_json::from_str(text).ok()?;
        if envelope.event_type != "MARKET_SUMMARY_UPDATE" {
            return None;
        }
        let pair = Pair::from_str(&envelope.data.currency_pair)?;
        Some(PriceTick {
            pair,
            price: Decimal::from_str(&envelope.data.last_traded_price).ok()?,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MarketSummaryEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: MarketSummaryData,
}

#[derive(Debug, Deserialize)]
struct MarketSummaryData {
    #[serde(rename = "currencyPair")]
    currency_pair: String,
    #[serde(rename = "lastTradedPrice")]
    last_traded_price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_market_summary_update() {
        let text = r#"{"type":"MARKET_SUMMARY_UPDATE","data":{"currencyPair":"BTCZAR","lastTradedPrice":"850000.00"}}"#;
        let tick = PriceStream::parse_tick(text).unwrap();
        assert_eq!(tick.pair, Pair::BTCZAR);
        assert_eq!(tick.price, Decimal::from_str("850000.00").unwrap());
    }

    #[test]
    fn ignores_other_event_types() {
        let text = r#"{"type":"AGGREGATED_ORDERBOOK_UPDATE","data":{"currencyPair":"BTCZAR","lastTradedPrice":"0"}}"#;
        assert!(PriceStream::parse_tick(text).is_none());
    }
}
