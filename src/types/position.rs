use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Pair, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    StopLoss,
    TakeProfit,
    Timeout,
    EmergencyClose,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::StopLoss => "STOP_LOSS",
            PositionStatus::TakeProfit => "TAKE_PROFIT",
            PositionStatus::Timeout => "TIMEOUT",
            PositionStatus::EmergencyClose => "EMERGENCY_CLOSE",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PositionStatus::Open),
            "STOP_LOSS" => Some(PositionStatus::StopLoss),
            "TAKE_PROFIT" => Some(PositionStatus::TakeProfit),
            "TIMEOUT" => Some(PositionStatus::Timeout),
            "EMERGENCY_CLOSE" => Some(PositionStatus::EmergencyClose),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PositionStatus::Open)
    }
}

/// A 24-hour hard timeout applies to every open position regardless of
/// SL/TP placement.
pub const POSITION_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pair: Pair,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub quantity: Decimal,
    pub position_value_zar: Decimal,
    pub leverage: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub pnl_pct: Option<Decimal>,
    pub pnl_zar: Option<Decimal>,
    pub status: PositionStatus,
    pub close_reason: Option<String>,
    pub strategic_reasoning: String,
    pub order_id: String,
}

impl Position {
    /// Stop/take prices are derived from entry price and pct parameters
    /// by the side's direction: BUY stop is below entry, SELL stop is above.
    pub fn open(
        pair: Pair,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: Decimal,
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
        strategic_reasoning: String,
        order_id: String,
    ) -> Self {
        let hundred = Decimal::from(100);
        let (stop_loss_price, take_profit_price) = match side {
            Side::Buy => (
                entry_price * (Decimal::ONE - stop_loss_pct / hundred),
                entry_price * (Decimal::ONE + take_profit_pct / hundred),
            ),
            Side::Sell => (
                entry_price * (Decimal::ONE + stop_loss_pct / hundred),
                entry_price * (Decimal::ONE - take_profit_pct / hundred),
            ),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            pair,
            side,
            entry_price,
            entry_time: Utc::now(),
            quantity,
            position_value_zar: entry_price * quantity,
            leverage,
            stop_loss_price,
            take_profit_price,
            exit_price: None,
            exit_time: None,
            pnl_pct: None,
            pnl_zar: None,
            status: PositionStatus::Open,
            close_reason: None,
            strategic_reasoning,
            order_id,
        }
    }

    pub fn is_stop_loss_crossed(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_loss_price,
            Side::Sell => price >= self.stop_loss_price,
        }
    }

    pub fn is_take_profit_crossed(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price >= self.take_profit_price,
            Side::Sell => price <= self.take_profit_price,
        }
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        now - self.entry_time > chrono::Duration::hours(POSITION_MAX_AGE_HOURS)
    }

    /// Unrealized P&L pct at `price`, leveraged, signed by side.
    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let raw = (price - self.entry_price) / self.entry_price * Decimal::from(self.side.sign());
        raw * self.leverage * Decimal::from(100)
    }

    /// Closes the position at `exit_price` for `reason`, computing the
    /// leveraged realized P&L. Stop-loss is evaluated before take-profit
    /// when both could apply to the same price sample.
    pub fn close(&mut self, exit_price: Decimal, status: PositionStatus, reason: &str) {
        let pnl_pct = self.unrealized_pnl_pct(exit_price);
        let pnl_zar = self.position_value_zar * pnl_pct / Decimal::from(100);
        self.exit_price = Some(exit_price);
        self.exit_time = Some(Utc::now());
        self.pnl_pct = Some(pnl_pct);
        self.pnl_zar = Some(pnl_zar);
        self.status = status;
        self.close_reason = Some(reason.to_string());
    }
}

/// A closing action decided by the position monitor for a tick; the
/// caller (Engine) performs the actual close and portfolio update.
#[derive(Debug, Clone)]
pub struct PositionCloseAction {
    pub position_id: String,
    pub status: PositionStatus,
    pub current_price: Decimal,
}
