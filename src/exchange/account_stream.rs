use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha512;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::types::{Pair, Side};

type HmacSha512 = Hmac<Sha512>;

const ACCOUNT_WS_PATH: &str = "/ws/account";

/// Outcome of an order placed over the account WebSocket, correlated back to
/// the request via `customerOrderId`.
#[derive(Debug, Clone)]
pub struct AccountOrderUpdate {
    pub order_id: String,
    pub order_status: String,
    pub pair: Pair,
    pub side: Side,
    pub quantity: Decimal,
}

/// One fill confirmation for an order placed via the account stream.
#[derive(Debug, Clone)]
pub struct AccountTrade {
    pub order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub taker_fee: Decimal,
}

/// Authenticated account WebSocket: places orders with `PLACE_ORDER` and
/// waits for the matching `ORDER_PROCESSED` (order accepted/rejected) and
/// `NEW_TRADE` (filled) events, correlated by a client-generated order id.
/// Used by the live client as the fast path, with REST as fallback on
/// timeout or when the connection is down.
pub struct AccountStream {
    ws_base_url: String,
    api_key: String,
    api_secret: String,
    write: Arc<Mutex<Option<WriteHalf>>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<AccountOrderUpdate>>>>,
    pending_trades: Arc<Mutex<HashMap<String, oneshot::Sender<AccountTrade>>>>,
    buffered_trades: Arc<Mutex<HashMap<String, AccountTrade>>>,
    connected: Arc<tokio::sync::RwLock<bool>>,
}

type WriteHalf = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

impl AccountStream {
    pub fn new(ws_base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            ws_base_url,
            api_key,
            api_secret,
            write: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pending_trades: Arc::new(Mutex::new(HashMap::new())),
            buffered_trades: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// Waits (up to the caller's own timeout) for the `NEW_TRADE`
    /// confirming `order_id`. If the trade already arrived before this
    /// call (a race against `ORDER_PROCESSED`), it returns immediately
    /// from the small arrival buffer instead of waiting forever.
    pub async fn await_trade(&self, order_id: &str) -> oneshot::Receiver<AccountTrade> {
        let (sender, receiver) = oneshot::channel();
        if let Some(trade) = self.buffered_trades.lock().await.remove(order_id) {
            let _ = sender.send(trade);
            return receiver;
        }
        self.pending_trades.lock().await.insert(order_id.to_string(), sender);
        receiver
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    fn sign(&self, timestamp_ms: i64) -> String {
        let message = format!("{timestamp_ms}GET{ACCOUNT_WS_PATH}");
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Connects (or reconnects) and spawns the read loop. Safe to call
    /// repeatedly; a prior connection is dropped when this one takes over.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms);
        let url = format!("{}{}", self.ws_base_url, ACCOUNT_WS_PATH);

        let mut request = url.clone().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("X-API-KEY", self.api_key.parse()?);
        headers.insert("X-SIGNATURE", signature.parse()?);
        headers.insert("X-TIMESTAMP", timestamp_ms.to_string().parse()?);

        let (ws_stream, _) = connect_async(request).await?;
        let (write, mut read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        *self.connected.write().await = true;
        info!("account stream connected");

        let pending = self.pending.clone();
        let pending_trades = self.pending_trades.clone();
        let buffered_trades = self.buffered_trades.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        Self::dispatch(&text, &pending, &pending_trades, &buffered_trades).await
                    }
                    Ok(Message::Close(_)) => {
                        warn!("account stream closed by server");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "account stream read error");
                        break;
                    }
                    _ => {}
                }
            }
            *connected.write().await = false;
        });

        Ok(())
    }

    async fn dispatch(
        text: &str,
        pending: &Arc<Mutex<HashMap<String, oneshot::Sender<AccountOrderUpdate>>>>,
        pending_trades: &Arc<Mutex<HashMap<String, oneshot::Sender<AccountTrade>>>>,
        buffered_trades: &Arc<Mutex<HashMap<String, AccountTrade>>>,
    ) {
        let Ok(envelope) = serde_json::from_str::<AccountEnvelope>(text) else {
            debug!(raw = %text, "unrecognized account stream message");
            return;
        };

        match envelope.event_type.as_str() {
            "AUTHENTICATED" => info!("account stream authenticated"),
            "ORDER_PROCESSED" => {
                let Ok(data) = serde_json::from_value::<OrderProcessedData>(envelope.data) else {
                    return;
                };
                let Some(correlation_id) = data.customer_order_id.clone() else {
                    return;
                };
                let Some(pair) = Pair::from_str(&data.currency_pair) else {
                    return;
                };
                let Some(side) = Side::from_str(&data.side) else {
                    return;
                };
                let Ok(quantity) = Decimal::from_str(&data.original_quantity) else {
                    return;
                };

                let mut pending = pending.lock().await;
                if let Some(sender) = pending.remove(&correlation_id) {
                    let _ = sender.send(AccountOrderUpdate {
                        order_id: data.order_id,
                        order_status: data.order_status,
                        pair,
                        side,
                        quantity,
                    });
                }
            }
            "NEW_TRADE" => {
                let Ok(data) = serde_json::from_value::<NewTradeData>(envelope.data) else {
                    return;
                };
                let Ok(price) = Decimal::from_str(&data.price) else {
                    return;
                };
                let Ok(quantity) = Decimal::from_str(&data.quantity) else {
                    return;
                };
                let Ok(taker_fee) = Decimal::from_str(&data.taker_fee) else {
                    return;
                };
                let trade = AccountTrade {
                    order_id: data.order_id.clone(),
                    price,
                    quantity,
                    taker_fee,
                };

                let mut pending_trades = pending_trades.lock().await;
                if let Some(sender) = pending_trades.remove(&data.order_id) {
                    let _ = sender.send(trade);
                } else {
                    buffered_trades.lock().await.insert(data.order_id, trade);
                }
            }
            "BALANCE_UPDATE" => debug!("account stream balance update received"),
            other => debug!(event = other, "unhandled account stream event"),
        }
    }

    /// Sends `PLACE_ORDER` and returns a receiver that resolves when the
    /// matching `ORDER_PROCESSED` arrives. The caller is responsible for
    /// timing the wait out (≤10s per the live client's fallback policy).
    pub async fn place_order(
        &self,
        correlation_id: String,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> anyhow::Result<oneshot::Receiver<AccountOrderUpdate>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id.clone(), sender);

        let order_type = if price.is_some() { "LIMIT" } else { "MARKET" };
        let mut data = serde_json::json!({
            "currencyPair": pair.as_str(),
            "side": side.as_str(),
            "orderType": order_type,
            "quantity": quantity.to_string(),
            "customerOrderId": correlation_id,
        });
        if let Some(price) = price {
            data["price"] = serde_json::Value::String(price.to_string());
        }
        let payload = serde_json::json!({ "type": "PLACE_ORDER", "data": data }).to_string();

        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(write) => {
                write.send(Message::Text(payload)).await?;
                Ok(receiver)
            }
            None => anyhow::bail!("account stream not connected"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NewTradeData {
    #[serde(rename = "orderId")]
    order_id: String,
    price: String,
    quantity: String,
    #[serde(rename = "takerFee")]
    taker_fee: String,
}

#[derive(Debug, Deserialize)]
struct OrderProcessedData {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "currencyPair")]
    currency_pair: String,
    side: String,
    #[serde(rename = "originalQuantity")]
    original_quantity: String,
    #[serde(rename = "customerOrderId")]
    customer_order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_depends_on_timestamp() {
        let stream = AccountStream::new(
            "wss://example.invalid".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        assert_ne!(stream.sign(1000), stream.sign(2000));
    }
}
