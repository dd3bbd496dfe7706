use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Pair, Side, TradingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLossLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub pair: Pair,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub post_only: bool,
}

impl OrderRequest {
    pub fn market(pair: Pair, side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            post_only: false,
        }
    }

    pub fn limit(pair: Pair, side: Side, quantity: Decimal, price: Decimal, post_only: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            post_only,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "FILLED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }
}

/// The common return shape of both the paper and live clients, enriched
/// by the execution router with routing metadata before reaching callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: String,
    pub pair: Pair,
    pub side: Side,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub market_price: Decimal,
    pub slippage_pct: Decimal,
    pub fees: Decimal,
    pub latency_ms: u64,
    pub status: OrderStatus,
    pub filled_at: DateTime<Utc>,
    pub mode: TradingMode,
    pub error: Option<String>,
    pub routed_via: Option<String>,
    pub safety_checked: bool,
    pub safety_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: Decimal,
}
