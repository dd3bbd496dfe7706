use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{EngineConfig, RuntimeConfigManager};
use crate::database::Store;
use crate::exchange::{AccountStream, ExchangeClient, PriceStream};
use crate::ml::persistence::ModelPersistence;
use crate::ml::{DefaultPredictor, Predictor};
use crate::risk::{PortfolioRiskManager, RiskSizer, StrategicGate};
use crate::types::{
    Pair, RejectionStage, Side, Signal3, TradeParameters, TradingMode,
};

use super::events::EngineEvent;
use super::execution_router::ExecutionRouter;
use super::live_client::LiveClient;
use super::mode_orchestrator::ModeOrchestrator;
use super::paper_client::PaperClient;
use super::pipeline::{Pipeline, PipelineState, PipelineStatus};
use super::poller::CandlePoller;
use super::position_manager::PositionManager;
use super::recovery::TierRecovery;
use super::aggregator::CandleAggregator;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const PRICE_TICK_CHANNEL_CAPACITY: usize = 256;
const POSITION_MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
const HEALTH_MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const MAX_CONSECUTIVE_EVENT_LOOP_ERRORS: u32 = 10;
const CATCH_UP_BATCH: i64 = 10;

/// Snapshot returned by `GET /engine/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub status: String,
    pub trading_mode: TradingMode,
    pub pairs: Vec<Pair>,
    pub cycle_count: u64,
    pub current_stage: Option<String>,
    pub last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
    pub consecutive_errors: u32,
    pub auto_trading_enabled: bool,
    pub emergency_stop_active: bool,
}

/// Owns every tier instance by value and runs the full set of cooperative
/// loops described by the concurrency model: the candle poller, the price
/// stream consumer, the event loop, the position monitor (5s), and the
/// health monitor (30s), plus the periodic candle aggregator.
pub struct Engine {
    store: Arc<Store>,
    runtime_config: Arc<RuntimeConfigManager>,
    mode_orchestrator: Arc<ModeOrchestrator>,
    router: Arc<ExecutionRouter>,
    position_manager: Arc<PositionManager>,
    pipeline: Arc<Pipeline>,
    pipeline_state: Arc<PipelineState>,
    tier_recovery: Arc<TierRecovery>,
    poller: Arc<CandlePoller>,
    aggregator: Arc<CandleAggregator>,
    price_stream: Mutex<Option<PriceStream>>,
    price_stream_connected: Arc<AtomicBool>,
    price_cache: Arc<RwLock<HashMap<Pair, (Decimal, chrono::DateTime<chrono::Utc>)>>>,
    pairs: Vec<Pair>,
    event_tx: mpsc::Sender<EngineEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    consecutive_errors: AtomicU32,
}

impl Engine {
    pub async fn new(
        config: &EngineConfig,
        store: Arc<Store>,
        runtime_config: Arc<RuntimeConfigManager>,
        pairs: Vec<Pair>,
        auto_trading_enabled: bool,
    ) -> anyhow::Result<Self> {
        let mode_orchestrator = Arc::new(ModeOrchestrator::new(store.clone()));

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let price_cache = Arc::new(RwLock::new(HashMap::new()));

        let paper_client = Arc::new(PaperClient::new(
            price_cache.clone(),
            rust_decimal_macros::dec!(100000),
        ));

        let live_client = if config.valr_api_key.is_empty() || config.valr_api_secret.is_empty() {
            None
        } else {
            let exchange = ExchangeClient::new(
                config.valr_base_url.clone(),
                config.valr_api_key.clone(),
                config.valr_api_secret.clone(),
            );
            let account_stream = Arc::new(AccountStream::new(
                config.valr_ws_base_url.clone(),
                config.valr_api_key.clone(),
                config.valr_api_secret.clone(),
            ));
            if let Err(e) = account_stream.connect().await {
                warn!(error = %e, "account stream failed to connect at startup, will fall back to REST");
            }
            Some(Arc::new(LiveClient::new(exchange, account_stream, price_cache.clone())))
        };

        let router = Arc::new(ExecutionRouter::new(
            store.clone(),
            mode_orchestrator.clone(),
            runtime_config.clone(),
            paper_client,
            live_client,
            price_cache.clone(),
        ));

        let position_manager = Arc::new(PositionManager::new(store.clone(), router.clone(), price_cache.clone()));

        let persistence = ModelPersistence::new(store.pool().clone(), "./models");
        let predictor: Arc<dyn Predictor> = Arc::new(DefaultPredictor::new(store.clone(), &persistence).await?);
        let risk_sizer = RiskSizer::new(store.clone());
        let strategic_gate = config
            .llm_api_key
            .as_ref()
            .map(|key| StrategicGate::new(store.clone(), Some(key.clone())));
        let portfolio_risk = PortfolioRiskManager::new(store.clone());
        let tier_recovery = Arc::new(TierRecovery::new());
        let pipeline_state = Arc::new(PipelineState::new(auto_trading_enabled));

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            predictor,
            risk_sizer,
            strategic_gate,
            portfolio_risk,
            position_manager.clone(),
            runtime_config.clone(),
            pipeline_state.clone(),
            tier_recovery.clone(),
        ));

        let public_exchange = ExchangeClient::public_only(config.valr_base_url.clone());
        let poller = Arc::new(CandlePoller::new(
            public_exchange,
            store.clone(),
            pairs.clone(),
            event_tx.clone(),
        ));
        let aggregator = Arc::new(CandleAggregator::new(store.clone(), pairs.clone()));

        let price_stream = PriceStream::new(config.valr_ws_base_url.clone(), pairs.clone());
        let price_stream_connected = price_stream.connection_flag();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            store,
            runtime_config,
            mode_orchestrator,
            router,
            position_manager,
            pipeline,
            pipeline_state,
            tier_recovery,
            poller,
            aggregator,
            price_stream: Mutex::new(Some(price_stream)),
            price_stream_connected,
            price_cache,
            pairs,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown_tx,
            shutdown_rx,
            consecutive_errors: AtomicU32::new(0),
        })
    }

    pub fn router(&self) -> Arc<ExecutionRouter> {
        self.router.clone()
    }

    pub fn mode_orchestrator(&self) -> Arc<ModeOrchestrator> {
        self.mode_orchestrator.clone()
    }

    /// Spawns the poller, price stream, aggregator, event loop, position
    /// monitor and health monitor as independent tasks and returns
    /// immediately; the tasks run until `shutdown` is called.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let poller = self.poller.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move { poller.run(shutdown_rx).await });

        let aggregator = self.aggregator.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move { aggregator.run(shutdown_rx).await });

        if let Some(price_stream) = self.price_stream.lock().await.take() {
            let (price_tx, mut price_rx) = mpsc::channel(PRICE_TICK_CHANNEL_CAPACITY);
            price_stream.spawn(price_tx);

            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(tick) = price_rx.recv().await {
                    if event_tx.try_send(EngineEvent::PriceUpdate(tick)).is_err() {
                        tracing::debug!("event channel full, dropping price update");
                    }
                }
            });
        }

        let engine = self.clone();
        tokio::spawn(async move { engine.run_event_loop().await });

        let engine = self.clone();
        tokio::spawn(async move { engine.run_position_monitor().await });

        let engine = self.clone();
        tokio::spawn(async move { engine.run_health_monitor().await });

        info!(pairs = ?self.pairs, "engine started");
        Ok(())
    }

    async fn run_event_loop(self: Arc<Self>) {
        let Some(mut rx) = self.event_rx.lock().await.take() else {
            error!("event loop started twice, aborting second instance");
            return;
        };

        loop {
            if *self.shutdown_rx.borrow() {
                info!("event loop shutting down");
                return;
            }

            match tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await {
                Ok(Some(event)) => {
                    if let Err(e) = self.dispatch(event).await {
                        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                        error!(error = %e, consecutive_errors = errors, "event loop dispatch failed");
                        if errors >= MAX_CONSECUTIVE_EVENT_LOOP_ERRORS {
                            self.trigger_emergency_stop("event loop exceeded consecutive error threshold").await;
                        }
                    } else {
                        self.consecutive_errors.store(0, Ordering::SeqCst);
                    }
                }
                Ok(None) => {
                    info!("event channel closed, event loop stopping");
                    return;
                }
                Err(_timeout) => {}
            }
        }
    }

    async fn dispatch(&self, event: EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::NewCandle(candle) => self.pipeline.run_cycle(candle).await,
            EngineEvent::PriceUpdate(tick) => {
                self.price_cache.write().await.insert(tick.pair, (tick.price, tick.timestamp));
                Ok(())
            }
            EngineEvent::OrderBookUpdate => Ok(()),
            EngineEvent::Alert(message) => {
                warn!(%message, "engine alert");
                Ok(())
            }
        }
    }

    async fn run_position_monitor(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POSITION_MONITOR_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("position monitor shutting down");
                        return;
                    }
                }
            }

            match self.position_manager.evaluate_open_positions().await {
                Ok(actions) => {
                    for action in actions {
                        match self
                            .position_manager
                            .close(&action.position_id, action.status, action.current_price, action.status.as_str())
                            .await
                        {
                            Ok(Some(position)) => info!(
                                position_id = %position.id, status = action.status.as_str(),
                                pnl_zar = ?position.pnl_zar, "position monitor closed position"
                            ),
                            Ok(None) => {}
                            Err(e) => error!(error = %e, position_id = %action.position_id, "failed to close triggered position"),
                        }
                    }
                }
                Err(e) => error!(error = %e, "position monitor evaluation failed"),
            }
        }
    }

    async fn run_health_monitor(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEALTH_MONITOR_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health monitor shutting down");
                        return;
                    }
                }
            }

            if !self.price_stream_connected.load(Ordering::Relaxed) {
                warn!("price stream reports disconnected, relying on its internal reconnect loop");
            }

            if let Err(e) = self.store.health_check().await {
                error!(critical = true, error = %e, "database health check failed");
            }

            for tier in ["predictor", "risk_sizer", "strategic_gate", "portfolio_risk", "position_manager"] {
                if !self.tier_recovery.is_healthy(tier).await {
                    warn!(tier, "tier remains unhealthy after repeated failures");
                }
            }

            if let Ok(Some(portfolio)) = self.store.get_portfolio_state().await {
                let max_drawdown_pct = self.runtime_config.snapshot().await.portfolio_risk.max_drawdown_pct;
                if portfolio.current_drawdown_pct > max_drawdown_pct {
                    self.trigger_emergency_stop("portfolio drawdown exceeded configured limit").await;
                }
            }

            if self.pipeline_state.auto_trading_enabled.load(Ordering::SeqCst)
                && !self.pipeline_state.emergency_stop_active.load(Ordering::SeqCst)
            {
                if let Err(e) = self.run_catch_up().await {
                    warn!(error = %e, "catch-up sweep failed");
                }
            }
        }
    }

    /// Re-validates every pending decision older than the sweep window
    /// against the portfolio risk limits and, if it still clears them,
    /// executes it; mirrors the original pipeline's final two stages.
    async fn run_catch_up(&self) -> anyhow::Result<()> {
        let pending = self.store.get_pending_decisions(CATCH_UP_BATCH).await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "running catch-up sweep over pending decisions");

        for decision in pending {
            let params = TradeParameters {
                position_size_zar: decision.position_size_zar,
                leverage: decision.leverage,
                stop_loss_pct: decision.stop_loss_pct,
                take_profit_pct: decision.take_profit_pct,
                max_loss_zar: rust_decimal::Decimal::ZERO,
                expected_gain_zar: rust_decimal::Decimal::ZERO,
            };

            let result = self.pipeline.portfolio_risk_check(decision.pair, &params).await?;
            if !result.passed {
                let reason = result.reason.unwrap_or_else(|| "portfolio risk limits violated".to_string());
                self.store
                    .mark_decision_rejected(decision.id, RejectionStage::Tier5PortfolioRiskRecheck, &reason, None)
                    .await?;
                continue;
            }

            let side = match decision.signal {
                Signal3::Buy => Side::Buy,
                Signal3::Sell => Side::Sell,
                Signal3::Hold => continue,
            };
            match self.position_manager.open(decision.pair, side, &params, String::new()).await? {
                Some(position) => {
                    self.store.mark_decision_executed(decision.id, &position.order_id).await?;
                }
                None => {
                    self.store
                        .mark_decision_rejected(decision.id, RejectionStage::Tier5ExecutionFailed, "entry order failed", None)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn trigger_emergency_stop(&self, reason: &str) {
        if self.pipeline_state.emergency_stop_active.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline_state.auto_trading_enabled.store(false, Ordering::SeqCst);
        error!(critical = true, reason, "emergency stop triggered");

        match self.position_manager.close_all_for_emergency_stop().await {
            Ok(closed) => info!(count = closed.len(), "emergency stop closed all open positions"),
            Err(e) => error!(critical = true, error = %e, "emergency stop failed to close open positions"),
        }
    }

    pub async fn emergency_stop(&self) {
        self.trigger_emergency_stop("operator requested emergency stop").await;
    }

    /// Only an explicit operator call clears the latch, never automatic
    /// recovery.
    pub fn clear_emergency_stop(&self) {
        self.pipeline_state.emergency_stop_active.store(false, Ordering::SeqCst);
        info!("emergency stop cleared by operator");
    }

    pub fn set_auto_trading(&self, enabled: bool) {
        self.pipeline_state.auto_trading_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "auto trading toggled");
    }

    pub async fn status(&self) -> anyhow::Result<EngineStatus> {
        let PipelineStatus {
            cycle_count,
            current_stage,
            last_cycle_at,
        } = self.pipeline_state.status().await;
        let trading_mode = self.mode_orchestrator.get_current_mode().await?;
        let emergency_stop_active = self.pipeline_state.emergency_stop_active.load(Ordering::SeqCst);
        Ok(EngineStatus {
            status: if emergency_stop_active { "EMERGENCY_STOP".to_string() } else { "RUNNING".to_string() },
            trading_mode,
            pairs: self.pairs.clone(),
            cycle_count,
            current_stage,
            last_cycle_at,
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            auto_trading_enabled: self.pipeline_state.auto_trading_enabled.load(Ordering::SeqCst),
            emergency_stop_active,
        })
    }

    /// Flips the shutdown flag; every loop observes it at its next
    /// suspension point and returns without interrupting in-flight order
    /// I/O.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("engine shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn test_config() -> EngineConfig {
        EngineConfig {
            valr_api_key: String::new(),
            valr_api_secret: String::new(),
            valr_base_url: "https://api.valr.com".to_string(),
            valr_ws_base_url: "wss://api.valr.com".to_string(),
            database_url: "sqlite::memory:".to_string(),
            web_port: 8080,
            initial_mode: TradingMode::Paper,
            llm_api_key: None,
            log_level: "info".to_string(),
        }
    }

    async fn test_engine() -> Arc<Engine> {
        let config = test_config();
        let store = Arc::new(Store::new("sqlite::memory:").await.unwrap());
        let runtime_config = Arc::new(RuntimeConfigManager::new(RuntimeConfig::default()));
        Arc::new(
            Engine::new(&config, store, runtime_config, vec![Pair::BTCZAR], false)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn starts_in_paper_mode_with_auto_trading_off() {
        let engine = test_engine().await;
        let status = engine.status().await.unwrap();
        assert_eq!(status.trading_mode, TradingMode::Paper);
        assert!(!status.auto_trading_enabled);
        assert!(!status.emergency_stop_active);
    }

    #[tokio::test]
    async fn set_auto_trading_toggles_status() {
        let engine = test_engine().await;
        engine.set_auto_trading(true);
        assert!(engine.status().await.unwrap().auto_trading_enabled);
        engine.set_auto_trading(false);
        assert!(!engine.status().await.unwrap().auto_trading_enabled);
    }

    #[tokio::test]
    async fn emergency_stop_latches_until_explicitly_cleared() {
        let engine = test_engine().await;
        engine.set_auto_trading(true);
        engine.emergency_stop().await;

        let status = engine.status().await.unwrap();
        assert!(status.emergency_stop_active);
        assert_eq!(status.status, "EMERGENCY_STOP");
        assert!(!status.auto_trading_enabled);

        // a second call is a no-op, not a second round of position closes
        engine.emergency_stop().await;
        assert!(engine.status().await.unwrap().emergency_stop_active);

        engine.clear_emergency_stop();
        assert!(!engine.status().await.unwrap().emergency_stop_active);
    }

    #[tokio::test]
    async fn shutdown_flips_the_watch_channel() {
        let engine = test_engine().await;
        let mut rx = engine.shutdown_rx.clone();
        assert!(!*rx.borrow());
        engine.shutdown();
        assert!(*rx.borrow());
    }

    /// S5: a decision left pending (not executed, not rejected) survives
    /// a restart and is picked up and executed by the catch-up sweep,
    /// provided it still clears portfolio risk.
    #[tokio::test]
    async fn catch_up_sweep_executes_a_stranded_pending_decision() {
        let engine = test_engine().await;
        engine
            .price_cache
            .write()
            .await
            .insert(Pair::BTCZAR, (rust_decimal_macros::dec!(850000), chrono::Utc::now()));

        let id = engine
            .store
            .insert_pending_decision(
                Pair::BTCZAR,
                Signal3::Buy,
                0.72,
                rust_decimal_macros::dec!(5000),
                rust_decimal_macros::dec!(1),
                rust_decimal_macros::dec!(2),
                rust_decimal_macros::dec!(4),
            )
            .await
            .unwrap();

        engine.run_catch_up().await.unwrap();

        let pending = engine.store.get_pending_decisions(10).await.unwrap();
        assert!(pending.iter().all(|d| d.id != id));
    }

    /// S6: emergency stop closes every open position, flips auto-trading
    /// off, and latches until an explicit clear.
    #[tokio::test]
    async fn emergency_stop_closes_open_positions_and_disables_auto_trading() {
        let engine = test_engine().await;
        engine.set_auto_trading(true);

        let position = crate::types::Position::open(
            Pair::BTCZAR,
            Side::Buy,
            rust_decimal_macros::dec!(850000),
            rust_decimal_macros::dec!(0.01),
            rust_decimal_macros::dec!(1),
            rust_decimal_macros::dec!(2),
            rust_decimal_macros::dec!(4),
            String::new(),
            "test-order".to_string(),
        );
        engine.store.insert_position(&position).await.unwrap();

        engine.emergency_stop().await;

        let status = engine.status().await.unwrap();
        assert!(status.emergency_stop_active);
        assert!(!status.auto_trading_enabled);
        assert!(engine.store.get_open_positions().await.unwrap().is_empty());
    }
}
