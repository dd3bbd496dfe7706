use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::config::RuntimeConfigManager;
use crate::database::Store;
use crate::risk::LiveSafetyGates;
use crate::types::{Balance, OrderResult, OrderStatus, Pair, Side, TradingMode};

use super::live_client::LiveClient;
use super::mode_orchestrator::ModeOrchestrator;
use super::paper_client::PaperClient;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("LIVE mode is active but no live credentials are configured")]
    NoLiveCredentials,
}

/// The single entry point trades go through: looks up the current mode
/// fresh on every call (never cached — the mode is hot-swappable),
/// resolves the paper or live client, runs live safety gates when in
/// LIVE mode, and enriches whatever the client returns with routing
/// metadata. Balance queries are passed through the same way.
pub struct ExecutionRouter {
    store: Arc<Store>,
    mode_orchestrator: Arc<ModeOrchestrator>,
    runtime_config: Arc<RuntimeConfigManager>,
    paper_client: Arc<PaperClient>,
    live_client: Option<Arc<LiveClient>>,
    safety_gates: LiveSafetyGates,
    price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
}

impl ExecutionRouter {
    pub fn new(
        store: Arc<Store>,
        mode_orchestrator: Arc<ModeOrchestrator>,
        runtime_config: Arc<RuntimeConfigManager>,
        paper_client: Arc<PaperClient>,
        live_client: Option<Arc<LiveClient>>,
        price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, chrono::DateTime<Utc>)>>>,
    ) -> Self {
        Self {
            safety_gates: LiveSafetyGates::new(store.clone()),
            store,
            mode_orchestrator,
            runtime_config,
            paper_client,
            live_client,
            price_cache,
        }
    }

    async fn estimated_price(&self, pair: Pair) -> Decimal {
        self.price_cache
            .read()
            .await
            .get(&pair)
            .map(|(price, _)| *price)
            .unwrap_or(Decimal::ZERO)
    }

    fn blocked(pair: Pair, side: Side, quantity: Decimal, reason: String) -> OrderResult {
        OrderResult {
            success: false,
            order_id: String::new(),
            pair,
            side,
            quantity,
            fill_price: Decimal::ZERO,
            market_price: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            fees: Decimal::ZERO,
            latency_ms: 0,
            status: OrderStatus::Rejected,
            filled_at: Utc::now(),
            mode: TradingMode::Live,
            error: Some(format!("Safety check failed: {reason}")),
            routed_via: Some("ExecutionRouter".to_string()),
            safety_checked: true,
            safety_status: Some(reason),
        }
    }

    pub async fn place_market_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResult> {
        let mode = self.mode_orchestrator.get_current_mode().await?;
        info!(pair = %pair, %side, %quantity, %mode, "router: market order request");

        let limits = self.runtime_config.snapshot().await.live_safety;
        let price = self.estimated_price(pair).await;
        let order_value = price * quantity;

        if matches!(mode, TradingMode::Live) {
            if self.live_client.is_none() {
                error!("LIVE mode active but no live credentials configured");
                return Ok(Self::blocked(
                    pair,
                    side,
                    quantity,
                    RouterError::NoLiveCredentials.to_string(),
                ));
            }

            let balance = self.current_balance_for(mode, pair, side).await?;
            let portfolio_value = self
                .store
                .get_portfolio_state()
                .await?
                .map(|s| s.total_value_zar)
                .unwrap_or(dec!(100000));

            let safety = self
                .safety_gates
                .check(mode, pair, side, order_value, quantity, portfolio_value, balance.as_ref(), &limits)
                .await?;
            if !safety.passed {
                let reason = safety.reason.unwrap_or_else(|| "blocked".to_string());
                error!(%reason, "router: trade blocked by live safety gates");
                return Ok(Self::blocked(pair, side, quantity, reason));
            }
        }

        let mut result = match mode {
            TradingMode::Paper => self.paper_client.place_market_order(pair, side, quantity).await?,
            TradingMode::Live => {
                self.live_client
                    .as_ref()
                    .expect("checked above")
                    .place_market_order(pair, side, quantity)
                    .await?
            }
        };

        result.routed_via = Some("ExecutionRouter".to_string());
        result.safety_checked = matches!(mode, TradingMode::Live);
        if result.safety_checked {
            result.safety_status = Some("passed".to_string());
        }

        if result.success {
            info!(client_type = %mode, "router: market order executed successfully");
        } else {
            error!(error = ?result.error, "router: market order failed");
        }

        Ok(result)
    }

    pub async fn place_limit_order(
        &self,
        pair: Pair,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> anyhow::Result<OrderResult> {
        let mode = self.mode_orchestrator.get_current_mode().await?;

        let mut result = match mode {
            TradingMode::Paper => {
                self.paper_client
                    .place_limit_order(pair, side, quantity, price)
                    .await?
            }
            TradingMode::Live => match &self.live_client {
                Some(client) => client.place_limit_order(pair, side, quantity, price, post_only).await?,
                None => return Ok(Self::blocked(pair, side, quantity, RouterError::NoLiveCredentials.to_string())),
            },
        };

        result.routed_via = Some("ExecutionRouter".to_string());
        Ok(result)
    }

    async fn current_balance_for(
        &self,
        mode: TradingMode,
        pair: Pair,
        side: Side,
    ) -> anyhow::Result<Option<Balance>> {
        let currency = match side {
            Side::Buy => pair.quote_asset(),
            Side::Sell => pair.base_asset(),
        };
        let available = match mode {
            TradingMode::Paper => self.paper_client.get_balance(currency).await,
            TradingMode::Live => match &self.live_client {
                Some(client) => client.get_balance(currency).await?,
                None => return Ok(None),
            },
        };
        Ok(Some(Balance {
            currency: currency.to_string(),
            available,
        }))
    }

    pub async fn get_balance(&self, currency: &str) -> anyhow::Result<Decimal> {
        let mode = self.mode_orchestrator.get_current_mode().await?;
        match mode {
            TradingMode::Paper => Ok(self.paper_client.get_balance(currency).await),
            TradingMode::Live => match &self.live_client {
                Some(client) => client.get_balance(currency).await,
                None => Err(RouterError::NoLiveCredentials.into()),
            },
        }
    }

    pub async fn get_all_balances(&self) -> anyhow::Result<Vec<Balance>> {
        let mode = self.mode_orchestrator.get_current_mode().await?;
        match mode {
            TradingMode::Paper => Ok(self.paper_client.get_all_balances().await),
            TradingMode::Live => match &self.live_client {
                Some(client) => client.get_all_balances().await,
                None => Err(RouterError::NoLiveCredentials.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;

    async fn router_in_paper_mode() -> ExecutionRouter {
        let store = Arc::new(Store::new("sqlite::memory:").await.unwrap());
        let mode_orchestrator = Arc::new(ModeOrchestrator::new(store.clone()));
        let runtime_config = Arc::new(RuntimeConfigManager::new(crate::config::RuntimeConfig::default()));
        let price_cache = Arc::new(tokio::sync::RwLock::new(HashMap::new()));
        price_cache.write().await.insert(Pair::BTCZAR, (dec!(850000), Utc::now()));
        let paper_client = Arc::new(PaperClient::new(price_cache.clone(), dec!(100000)));
        ExecutionRouter::new(store, mode_orchestrator, runtime_config, paper_client, None, price_cache)
    }

    #[tokio::test]
    async fn paper_mode_never_requires_live_credentials() {
        let router = router_in_paper_mode().await;
        let result = router
            .place_market_order(Pair::BTCZAR, Side::Buy, dec!(0.01))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.safety_checked);
    }

    #[tokio::test]
    async fn live_mode_without_credentials_fails_without_falling_back_to_paper() {
        let router = router_in_paper_mode().await;
        router
            .mode_orchestrator
            .set_mode(TradingMode::Live, true, "test".to_string())
            .await
            .unwrap();
        let result = router
            .place_market_order(Pair::BTCZAR, Side::Buy, dec!(0.01))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no live credentials"));
    }
}
