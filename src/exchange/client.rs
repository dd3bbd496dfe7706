use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha512;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::types::{Balance, Candle, Pair, Side, TimeFrame};

type HmacSha512 = Hmac<Sha512>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The exchange's REST surface: public candle buckets plus the signed
/// order/balance endpoints. `public_only()` builds a client that can
/// never sign a request — used by the candle poller and aggregator,
/// which have no business placing orders.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

/// One fill as returned by the market/limit order endpoints.
#[derive(Debug, Clone)]
pub struct ExchangeOrderResult {
    pub order_id: String,
    pub average_price: Decimal,
    pub total_fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ExchangeClient {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with default TLS config"),
            base_url,
            api_key,
            api_secret,
        }
    }

    pub fn public_only(base_url: String) -> Self {
        Self::new(base_url, String::new(), String::new())
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
        let message = format!("{timestamp_ms}{method}{path}{body}");
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_headers(&self, method: &str, path: &str, body: &str) -> reqwest::header::HeaderMap {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method, path, body);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-API-KEY", self.api_key.parse().unwrap());
        headers.insert("X-SIGNATURE", signature.parse().unwrap());
        headers.insert("X-TIMESTAMP", timestamp_ms.to_string().parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers
    }

    /// `GET /public/{pair}/buckets?periodSeconds=60&limit=2` — the poller's
    /// source of truth. Always returns 1-minute candles regardless of the
    /// `limit`; the caller decides how many to request.
    pub async fn get_recent_candles(&self, pair: Pair, limit: u32) -> Result<Vec<Candle>> {
        let url = format!("{}/public/{}/buckets", self.base_url, pair.as_str());
        let resp = self
            .http
            .get(&url)
            .query(&[("periodSeconds", "60"), ("limit", &limit.to_string())])
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            return Err(anyhow!("rate limited (HTTP 429) fetching candles for {}", pair));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("bucket fetch for {} failed with {}: {}", pair, status, text));
        }

        let buckets: Vec<BucketResponse> = resp.json().await?;
        buckets
            .into_iter()
            .map(|b| b.into_candle(pair))
            .collect()
    }

    /// `POST /orders/market`, body `{pair, side, baseAmount}`.
    pub async fn place_market_order(
        &self,
        pair: Pair,
        side: Side,
        base_amount: Decimal,
    ) -> Result<ExchangeOrderResult> {
        if !self.has_credentials() {
            return Err(anyhow!("no live credentials configured; cannot place orders"));
        }
        let path = "/orders/market";
        let body = serde_json::json!({
            "pair": pair.as_str(),
            "side": side.as_str(),
            "baseAmount": base_amount.to_string(),
        })
        .to_string();

        self.post_order(path, &body).await
    }

    /// `POST /orders/limit`, body `{pair, side, quantity, price, postOnly}`.
    pub async fn place_limit_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<ExchangeOrderResult> {
        if !self.has_credentials() {
            return Err(anyhow!("no live credentials configured; cannot place orders"));
        }
        let path = "/orders/limit";
        let body = serde_json::json!({
            "pair": pair.as_str(),
            "side": side.as_str(),
            "quantity": quantity.to_string(),
            "price": price.to_string(),
            "postOnly": post_only,
        })
        .to_string();

        self.post_order(path, &body).await
    }

    async fn post_order(&self, path: &str, body: &str) -> Result<ExchangeOrderResult> {
        let headers = self.signed_headers("POST", path, body);
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .body(body.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("order placement failed with {}: {}", status, text));
        }

        let order: OrderResponse = resp.json().await?;
        Ok(ExchangeOrderResult {
            order_id: order.order_id,
            average_price: Decimal::from_str(&order.average_price)?,
            total_fee: Decimal::from_str(&order.total_fee)?,
            created_at: DateTime::parse_from_rfc3339(&order.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// `DELETE /orders/order`, body `{orderId, pair}`.
    pub async fn cancel_order(&self, pair: Pair, order_id: &str) -> Result<()> {
        let path = "/orders/order";
        let body = serde_json::json!({ "orderId": order_id, "pair": pair.as_str() }).to_string();
        let headers = self.signed_headers("DELETE", path, &body);
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .delete(&url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(order_id, pair = %pair, error = %text, "order cancellation failed");
            return Err(anyhow!("order cancellation failed: {}", text));
        }
        Ok(())
    }

    /// `GET /account/balances` — balance queries always go through REST,
    /// even when a live WebSocket order channel is in use.
    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        if !self.has_credentials() {
            return Err(anyhow!("no live credentials configured; cannot query balances"));
        }
        let path = "/account/balances";
        let headers = self.signed_headers("GET", path, "");
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).headers(headers).send().await?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("balance query failed: {}", text));
        }

        let balances: Vec<BalanceResponse> = resp.json().await?;
        balances
            .into_iter()
            .map(|b| {
                Ok(Balance {
                    currency: b.currency,
                    available: Decimal::from_str(&b.available)?,
                })
            })
            .collect()
    }

    pub async fn get_balance(&self, currency: &str) -> Result<Decimal> {
        let balances = self.get_balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.currency == currency)
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO))
    }
}

#[derive(Debug, Deserialize)]
struct BucketResponse {
    #[serde(rename = "startTime")]
    start_time: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl BucketResponse {
    fn into_candle(self, pair: Pair) -> Result<Candle> {
        let open_time = DateTime::parse_from_rfc3339(&self.start_time.replace('Z', "+00:00"))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| anyhow!("invalid startTime {}: {}", self.start_time, e))?;
        let close_time = open_time + chrono::Duration::seconds(59);
        Ok(Candle {
            pair,
            timeframe: TimeFrame::M1,
            open_time,
            close_time,
            open: Decimal::from_str(&self.open)?,
            high: Decimal::from_str(&self.high)?,
            low: Decimal::from_str(&self.low)?,
            close: Decimal::from_str(&self.close)?,
            volume: Decimal::from_str(&self.volume)?,
            num_trades: 0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "averagePrice")]
    average_price: String,
    #[serde(rename = "totalFee")]
    total_fee: String,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    currency: String,
    available: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_only_client_has_no_credentials() {
        let client = ExchangeClient::public_only("https://example.invalid".to_string());
        assert!(!client.has_credentials());
    }

    #[test]
    fn signature_changes_with_body() {
        let client = ExchangeClient::new(
            "https://example.invalid".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        let a = client.sign(1000, "POST", "/orders/market", "{}");
        let b = client.sign(1000, "POST", "/orders/market", r#"{"pair":"BTCZAR"}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn bucket_response_converts_to_candle() {
        let bucket = BucketResponse {
            start_time: "2025-10-08T21:35:00Z".to_string(),
            open: "850000".to_string(),
            high: "851000".to_string(),
            low: "849000".to_string(),
            close: "850500".to_string(),
            volume: "1.25".to_string(),
        };
        let candle = bucket.into_candle(Pair::BTCZAR).unwrap();
        assert_eq!(candle.pair, Pair::BTCZAR);
        assert_eq!(candle.open, Decimal::from_str("850000").unwrap());
    }
}
