use chrono::Utc;
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::exchange::{AccountStream, ExchangeClient};
use crate::types::{Balance, OrderResult, OrderStatus, Pair, Side, TradingMode};

const ORDER_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const TRADE_FILL_TIMEOUT: Duration = Duration::from_secs(5);

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Routes orders to the real exchange: the authenticated WebSocket is the
/// fast path (place, await `ORDER_PROCESSED` then `NEW_TRADE`); REST is the
/// fallback on WS timeout, error, or when the socket is not connected.
/// Balance queries always go through REST, matching the exchange's own
/// recommendation that balance state not be inferred from the order
/// channel.
pub struct LiveClient {
    exchange: ExchangeClient,
    account_stream: Arc<AccountStream>,
    rate_limiter: Arc<DirectRateLimiter>,
    price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
}

impl LiveClient {
    pub fn new(
        exchange: ExchangeClient,
        account_stream: Arc<AccountStream>,
        price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(10).unwrap());
        Self {
            exchange,
            account_stream,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            price_cache,
        }
    }

    async fn market_price(&self, pair: Pair) -> Decimal {
        self.price_cache
            .read()
            .await
            .get(&pair)
            .map(|(price, _)| *price)
            .unwrap_or(Decimal::ZERO)
    }

    fn slippage_pct(market_price: Decimal, fill_price: Decimal) -> Decimal {
        if market_price.is_zero() {
            return Decimal::ZERO;
        }
        ((fill_price - market_price) / market_price * Decimal::from(100)).abs()
    }

    pub async fn place_market_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResult> {
        self.rate_limiter.until_ready().await;

        if self.account_stream.is_connected().await {
            match self.place_via_websocket(pair, side, quantity, None).await {
                Ok(result) => return Ok(result),
                Err(e) => warn!(error = %e, "live order over websocket failed, falling back to REST"),
            }
        }

        self.place_via_rest_market(pair, side, quantity).await
    }

    pub async fn place_limit_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> anyhow::Result<OrderResult> {
        self.rate_limiter.until_ready().await;

        if self.account_stream.is_connected().await {
            match self
                .place_via_websocket(pair, side, quantity, Some(price))
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => warn!(error = %e, "live limit order over websocket failed, falling back to REST"),
            }
        }

        self.rate_limiter.until_ready().await;
        let market_price = self.market_price(pair).await;
        let started = Utc::now();
        let order = self
            .exchange
            .place_limit_order(pair, side, quantity, price, post_only)
            .await?;
        Ok(self.rest_result(pair, side, quantity, market_price, order, started))
    }

    async fn place_via_websocket(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> anyhow::Result<OrderResult> {
        let correlation_id = Uuid::new_v4().to_string();
        let market_price = self.market_price(pair).await;

        let receiver = self
            .account_stream
            .place_order(correlation_id.clone(), pair, side, quantity, price)
            .await?;

        let order_update = tokio::time::timeout(ORDER_ACK_TIMEOUT, receiver)
            .await
            .map_err(|_| anyhow::anyhow!("ORDER_PROCESSED not received within {:?}", ORDER_ACK_TIMEOUT))?
            .map_err(|_| anyhow::anyhow!("account stream closed while awaiting ORDER_PROCESSED"))?;

        if order_update.order_status.eq_ignore_ascii_case("failed")
            || order_update.order_status.eq_ignore_ascii_case("rejected")
        {
            anyhow::bail!("order rejected by exchange: {}", order_update.order_status);
        }

        let trade_receiver = self.account_stream.await_trade(&order_update.order_id).await;
        let fill = tokio::time::timeout(TRADE_FILL_TIMEOUT, trade_receiver).await;

        let (fill_price, fees) = match fill {
            Ok(Ok(trade)) => (trade.price, trade.taker_fee),
            _ => {
                warn!(
                    order_id = %order_update.order_id,
                    "NEW_TRADE not received in time, reporting order without fill price"
                );
                (market_price, Decimal::ZERO)
            }
        };

        info!(order_id = %order_update.order_id, pair = %pair, %side, "live order filled via websocket");
        Ok(OrderResult {
            success: true,
            order_id: order_update.order_id,
            pair,
            side,
            quantity,
            fill_price,
            market_price,
            slippage_pct: Self::slippage_pct(market_price, fill_price),
            fees,
            latency_ms: 0,
            status: OrderStatus::Filled,
            filled_at: Utc::now(),
            mode: TradingMode::Live,
            error: None,
            routed_via: None,
            safety_checked: false,
            safety_status: None,
        })
    }

    async fn place_via_rest_market(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResult> {
        let market_price = self.market_price(pair).await;
        let started = Utc::now();
        let order = self.exchange.place_market_order(pair, side, quantity).await?;
        Ok(self.rest_result(pair, side, quantity, market_price, order, started))
    }

    fn rest_result(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        market_price: Decimal,
        order: crate::exchange::ExchangeOrderResult,
        started: chrono::DateTime<Utc>,
    ) -> OrderResult {
        let latency_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        OrderResult {
            success: true,
            order_id: order.order_id,
            pair,
            side,
            quantity,
            fill_price: order.average_price,
            market_price,
            slippage_pct: Self::slippage_pct(market_price, order.average_price),
            fees: order.total_fee,
            latency_ms,
            status: OrderStatus::Filled,
            filled_at: order.created_at,
            mode: TradingMode::Live,
            error: None,
            routed_via: None,
            safety_checked: false,
            safety_status: None,
        }
    }

    pub async fn get_balance(&self, currency: &str) -> anyhow::Result<Decimal> {
        self.rate_limiter.until_ready().await;
        self.exchange.get_balance(currency).await
    }

    pub async fn get_all_balances(&self) -> anyhow::Result<Vec<Balance>> {
        self.rate_limiter.until_ready().await;
        self.exchange.get_balances().await
    }
}
