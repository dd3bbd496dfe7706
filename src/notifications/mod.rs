use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::types::{Pair, RejectionStage};

/// Notification severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Alerts the engine can raise. Every variant maps to a single log line at
/// its default severity; there is no outbound channel (email/SMS/webhook)
/// here — that is left to whatever watches the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertType {
    PositionOpened {
        pair: Pair,
        side: String,
        quantity: String,
        entry_price: String,
    },
    PositionClosed {
        pair: Pair,
        pnl: String,
        pnl_pct: String,
        reason: String,
    },
    StopLossTriggered {
        pair: Pair,
        price: String,
        loss: String,
    },
    TakeProfitTriggered {
        pair: Pair,
        price: String,
        profit: String,
    },
    PositionTimedOut {
        pair: Pair,
        age_hours: i64,
    },
    TradeRejected {
        pair: Pair,
        stage: RejectionStage,
        reason: String,
    },

    MaxDrawdownApproached {
        current_drawdown: String,
        max_allowed: String,
    },
    MaxDrawdownExceeded {
        current_drawdown: String,
        max_allowed: String,
    },
    DailyLossLimitExceeded {
        current_loss: String,
        limit: String,
    },
    MaxPositionsReached {
        current: usize,
        max: usize,
    },

    EmergencyStopActivated {
        reason: String,
    },
    EmergencyStopCleared,
    ModeChanged {
        from: String,
        to: String,
        reason: String,
    },
    ConnectionLost {
        service: String,
    },
    ConnectionRestored {
        service: String,
    },
    EngineStarted,
    EngineStopped,
    ComponentDegraded {
        component: String,
        consecutive_failures: u32,
    },
    Error {
        component: String,
        message: String,
    },
}

impl AlertType {
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::MaxDrawdownExceeded { .. }
            | AlertType::DailyLossLimitExceeded { .. }
            | AlertType::EmergencyStopActivated { .. }
            | AlertType::ConnectionLost { .. }
            | AlertType::ComponentDegraded { .. }
            | AlertType::Error { .. } => Severity::Critical,

            AlertType::StopLossTriggered { .. }
            | AlertType::PositionTimedOut { .. }
            | AlertType::MaxDrawdownApproached { .. }
            | AlertType::MaxPositionsReached { .. }
            | AlertType::ModeChanged { .. }
            | AlertType::TradeRejected { .. } => Severity::Warning,

            _ => Severity::Info,
        }
    }

    pub fn title(&self) -> String {
        match self {
            AlertType::PositionOpened { pair, .. } => format!("Position opened: {pair}"),
            AlertType::PositionClosed { pair, .. } => format!("Position closed: {pair}"),
            AlertType::StopLossTriggered { pair, .. } => format!("Stop loss hit: {pair}"),
            AlertType::TakeProfitTriggered { pair, .. } => format!("Take profit hit: {pair}"),
            AlertType::PositionTimedOut { pair, .. } => format!("Position timed out: {pair}"),
            AlertType::TradeRejected { pair, .. } => format!("Trade rejected: {pair}"),
            AlertType::MaxDrawdownApproached { .. } => "Max drawdown approaching".to_string(),
            AlertType::MaxDrawdownExceeded { .. } => "MAX DRAWDOWN EXCEEDED".to_string(),
            AlertType::DailyLossLimitExceeded { .. } => "DAILY LOSS LIMIT EXCEEDED".to_string(),
            AlertType::MaxPositionsReached { .. } => "Max positions reached".to_string(),
            AlertType::EmergencyStopActivated { .. } => "EMERGENCY STOP ACTIVATED".to_string(),
            AlertType::EmergencyStopCleared => "Emergency stop cleared".to_string(),
            AlertType::ModeChanged { to, .. } => format!("Mode changed to {to}"),
            AlertType::ConnectionLost { service } => format!("Connection lost: {service}"),
            AlertType::ConnectionRestored { service } => format!("Connection restored: {service}"),
            AlertType::EngineStarted => "Engine started".to_string(),
            AlertType::EngineStopped => "Engine stopped".to_string(),
            AlertType::ComponentDegraded { component, .. } => format!("Component degraded: {component}"),
            AlertType::Error { component, .. } => format!("Error in {component}"),
        }
    }
}

/// A notification/alert with bookkeeping for the in-memory feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub acknowledged: bool,
}

impl Notification {
    pub fn new(alert_type: AlertType) -> Self {
        let severity = alert_type.default_severity();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            alert_type,
            acknowledged: false,
        }
    }
}

/// Keeps the last `max_notifications` alerts in memory for `/engine/status`
/// style queries, and always logs each one at its severity. There is no
/// database table for notifications — they are an operational feed, not
/// part of the persisted trading history.
pub struct NotificationManager {
    notifications: Arc<RwLock<Vec<Notification>>>,
    max_notifications: usize,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
            max_notifications: 500,
        }
    }

    pub async fn notify(&self, alert_type: AlertType) {
        let notification = Notification::new(alert_type);
        let title = notification.alert_type.title();
        match notification.severity {
            Severity::Critical => error!(alert = ?notification.alert_type, "{}", title),
            Severity::Warning => warn!(alert = ?notification.alert_type, "{}", title),
            Severity::Info => info!(alert = ?notification.alert_type, "{}", title),
        }

        let mut notifications = self.notifications.write().await;
        notifications.insert(0, notification);
        if notifications.len() > self.max_notifications {
            notifications.truncate(self.max_notifications);
        }
    }

    pub async fn get_recent(&self, limit: usize) -> Vec<Notification> {
        self.notifications.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn get_critical_unacknowledged(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| n.severity == Severity::Critical && !n.acknowledged)
            .cloned()
            .collect()
    }

    pub async fn acknowledge(&self, id: &str) {
        let mut notifications = self.notifications.write().await;
        if let Some(notification) = notifications.iter_mut().find(|n| n.id == id) {
            notification.acknowledged = true;
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn position_opened(pair: Pair, side: String, quantity: Decimal, entry_price: Decimal) -> AlertType {
    AlertType::PositionOpened {
        pair,
        side,
        quantity: quantity.to_string(),
        entry_price: entry_price.to_string(),
    }
}

pub fn position_closed(pair: Pair, pnl: Decimal, pnl_pct: Decimal, reason: String) -> AlertType {
    AlertType::PositionClosed {
        pair,
        pnl: pnl.to_string(),
        pnl_pct: pnl_pct.to_string(),
        reason,
    }
}

pub fn stop_loss_triggered(pair: Pair, price: Decimal, loss: Decimal) -> AlertType {
    AlertType::StopLossTriggered {
        pair,
        price: price.to_string(),
        loss: loss.to_string(),
    }
}

pub fn take_profit_triggered(pair: Pair, price: Decimal, profit: Decimal) -> AlertType {
    AlertType::TakeProfitTriggered {
        pair,
        price: price.to_string(),
        profit: profit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notification_creation_defaults_to_info() {
        let alert = position_opened(Pair::BTCZAR, "Buy".to_string(), dec!(1.0), dec!(850000));
        let notification = Notification::new(alert);
        assert_eq!(notification.severity, Severity::Info);
        assert!(!notification.acknowledged);
    }

    #[test]
    fn severity_defaults_match_alert_class() {
        let critical = AlertType::MaxDrawdownExceeded {
            current_drawdown: "20%".to_string(),
            max_allowed: "15%".to_string(),
        };
        assert_eq!(critical.default_severity(), Severity::Critical);

        let warning = AlertType::StopLossTriggered {
            pair: Pair::BTCZAR,
            price: "848000".to_string(),
            loss: "-500".to_string(),
        };
        assert_eq!(warning.default_severity(), Severity::Warning);

        assert_eq!(AlertType::EngineStarted.default_severity(), Severity::Info);
    }

    #[tokio::test]
    async fn manager_keeps_recent_notifications() {
        let manager = NotificationManager::new();
        manager.notify(AlertType::EngineStarted).await;
        manager
            .notify(position_opened(Pair::ETHZAR, "Buy".to_string(), dec!(10.0), dec!(3000)))
            .await;

        let recent = manager.get_recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(manager.get_recent(1).await.len(), 1);
    }

    #[tokio::test]
    async fn acknowledging_clears_critical_unacknowledged() {
        let manager = NotificationManager::new();
        manager
            .notify(AlertType::EmergencyStopActivated {
                reason: "daily loss limit exceeded".to_string(),
            })
            .await;
        let unacked = manager.get_critical_unacknowledged().await;
        assert_eq!(unacked.len(), 1);

        manager.acknowledge(&unacked[0].id).await;
        assert!(manager.get_critical_unacknowledged().await.is_empty());
    }
}
