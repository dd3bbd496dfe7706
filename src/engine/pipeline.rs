use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfigManager;
use crate::database::Store;
use crate::ml::{FeatureEngineer, Predictor};
use crate::risk::{GateVerdict, PortfolioRiskManager, RiskSizer, SizingOutcome, StrategicGate};
use crate::types::{
    Candle, CandleBuffer, Pair, RejectionStage, Side, Signal3, TimeFrame,
};

use super::position_manager::PositionManager;
use super::recovery::TierRecovery;

const MIN_M1_CANDLES: usize = 50;
const CANDLE_BUFFER_SIZE: usize = 200;
const CANDLE_RETRY_ATTEMPTS: u32 = 5;
const CANDLE_RETRY_DELAY_MS: u64 = 200;

/// Cycle progress, exposed to the HTTP status endpoint.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub cycle_count: u64,
    pub current_stage: Option<String>,
    pub last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Shared flags the event loop, the pipeline, and the HTTP control
/// surface all read and write: auto-trading toggle, the emergency-stop
/// latch, and cycle observability counters.
pub struct PipelineState {
    pub auto_trading_enabled: AtomicBool,
    pub emergency_stop_active: AtomicBool,
    cycle_count: AtomicU64,
    current_stage: RwLock<Option<String>>,
    last_cycle_at: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl PipelineState {
    pub fn new(auto_trading_enabled: bool) -> Self {
        Self {
            auto_trading_enabled: AtomicBool::new(auto_trading_enabled),
            emergency_stop_active: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
            current_stage: RwLock::new(None),
            last_cycle_at: RwLock::new(None),
        }
    }

    async fn enter_stage(&self, stage: &str) {
        *self.current_stage.write().await = Some(stage.to_string());
    }

    async fn finish_cycle(&self) {
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
        *self.current_stage.write().await = None;
        *self.last_cycle_at.write().await = Some(chrono::Utc::now());
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
            current_stage: self.current_stage.read().await.clone(),
            last_cycle_at: *self.last_cycle_at.read().await,
        }
    }
}

/// The tiered decision cycle triggered by every new 1-minute candle: data
/// ingestion, prediction, sizing, the optional strategic gate, portfolio
/// risk, then execution. Every intermediate stop writes (or has already
/// written) exactly one decision row before returning.
pub struct Pipeline {
    store: Arc<Store>,
    predictor: Arc<dyn Predictor>,
    risk_sizer: RiskSizer,
    strategic_gate: Option<StrategicGate>,
    portfolio_risk: PortfolioRiskManager,
    position_manager: Arc<PositionManager>,
    runtime_config: Arc<RuntimeConfigManager>,
    state: Arc<PipelineState>,
    tier_recovery: Arc<TierRecovery>,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        predictor: Arc<dyn Predictor>,
        risk_sizer: RiskSizer,
        strategic_gate: Option<StrategicGate>,
        portfolio_risk: PortfolioRiskManager,
        position_manager: Arc<PositionManager>,
        runtime_config: Arc<RuntimeConfigManager>,
        state: Arc<PipelineState>,
        tier_recovery: Arc<TierRecovery>,
    ) -> Self {
        Self {
            store,
            predictor,
            risk_sizer,
            strategic_gate,
            portfolio_risk,
            position_manager,
            runtime_config,
            state,
            tier_recovery,
        }
    }

    /// Runs one full cycle for the candle that triggered it. Returns once
    /// the candle has been priced into a feature vector and (if trading
    /// is enabled and nothing vetoed it) a position has been opened or
    /// the rejection/failure has been recorded.
    pub async fn run_cycle(&self, candle: Candle) -> anyhow::Result<()> {
        let pair = candle.pair;

        self.state.enter_stage("data_ingestion").await;
        if self.fetch_with_retry(pair, candle.timeframe, candle.open_time).await?.is_none() {
            warn!(%pair, open_time = %candle.open_time, "candle not found after retries, skipping cycle");
            self.state.finish_cycle().await;
            return Ok(());
        }

        let candles_by_timeframe = self.load_candle_buffers(pair).await?;
        let Some(m1) = candles_by_timeframe.get(&TimeFrame::M1) else {
            self.state.finish_cycle().await;
            return Ok(());
        };
        if m1.candles.len() < MIN_M1_CANDLES {
            debug!(%pair, count = m1.candles.len(), "not enough 1m history yet, skipping feature computation");
            self.state.finish_cycle().await;
            return Ok(());
        }

        let recent_closed = self.store.get_recent_closed_positions(pair, 20).await?;
        let btc_daily_owned = if pair == Pair::BTCZAR {
            None
        } else {
            Some(self.load_daily_buffer(Pair::BTCZAR).await?)
        };
        let btc_daily = btc_daily_owned.as_ref().or_else(|| candles_by_timeframe.get(&TimeFrame::D1));

        if let Some(feature_vector) = FeatureEngineer::compute(
            pair,
            &candles_by_timeframe,
            btc_daily,
            candles_by_timeframe.get(&TimeFrame::D1),
            &recent_closed,
        ) {
            self.store.insert_feature_vector(&feature_vector).await?;
        } else {
            debug!(%pair, "feature vector computation skipped, missing timeframe history");
        }

        if self.state.emergency_stop_active.load(Ordering::SeqCst)
            || !self.state.auto_trading_enabled.load(Ordering::SeqCst)
        {
            self.state.finish_cycle().await;
            return Ok(());
        }

        self.state.enter_stage("neural_prediction").await;
        let prediction = match self.predictor.predict(pair).await {
            Ok(p) => {
                self.tier_recovery.record_success("predictor").await;
                p
            }
            Err(e) => {
                self.tier_recovery.record_failure("predictor").await;
                warn!(%pair, error = %e, "predictor failed this cycle");
                self.state.finish_cycle().await;
                return Ok(());
            }
        };

        if matches!(prediction.class, Signal3::Hold) {
            self.state.finish_cycle().await;
            return Ok(());
        }

        self.state.enter_stage("position_sizing").await;
        let config = self.runtime_config.snapshot().await;
        let portfolio = self
            .store
            .get_portfolio_state()
            .await?
            .map(|s| s.total_value_zar)
            .unwrap_or(config.general.initial_balance_zar);
        let volatility_forecast = feature_volatility_estimate(&candles_by_timeframe);

        let outcome = match self
            .risk_sizer
            .size(
                pair,
                prediction.class,
                prediction.confidence,
                portfolio,
                volatility_forecast,
                &config.risk_sizer,
            )
            .await
        {
            Ok(outcome) => {
                self.tier_recovery.record_success("risk_sizer").await;
                outcome
            }
            Err(e) => {
                self.tier_recovery.record_failure("risk_sizer").await;
                return Err(e);
            }
        };

        let (decision_id, mut params) = match outcome {
            SizingOutcome::Sized { params, decision_id } => (decision_id, params),
            SizingOutcome::Rejected { .. } => {
                self.state.finish_cycle().await;
                return Ok(());
            }
        };

        let mut strategic_reasoning = String::new();

        if config.strategic_gate.enabled {
            self.state.enter_stage("llm_decision").await;
            if let Some(gate) = &self.strategic_gate {
                match gate
                    .evaluate(pair, prediction.class, prediction.confidence, &params, &config.strategic_gate)
                    .await
                {
                    Ok(GateVerdict::Approve) => {
                        self.tier_recovery.record_success("strategic_gate").await;
                    }
                    Ok(GateVerdict::Modify {
                        multiplier,
                        leverage_override,
                        stop_loss_pct_override,
                        take_profit_pct_override,
                    }) => {
                        self.tier_recovery.record_success("strategic_gate").await;
                        params = params.scaled(multiplier);
                        if let Some(leverage) = leverage_override {
                            params.leverage = leverage;
                        }
                        if let Some(stop_loss_pct) = stop_loss_pct_override {
                            params.stop_loss_pct = stop_loss_pct;
                        }
                        if let Some(take_profit_pct) = take_profit_pct_override {
                            params.take_profit_pct = take_profit_pct;
                        }
                        self.store
                            .update_decision_params(
                                decision_id,
                                params.position_size_zar,
                                params.leverage,
                                params.stop_loss_pct,
                                params.take_profit_pct,
                            )
                            .await?;
                        strategic_reasoning = "strategic gate modified sizing".to_string();
                    }
                    Ok(GateVerdict::Reject { reason }) => {
                        self.tier_recovery.record_success("strategic_gate").await;
                        self.store
                            .mark_decision_rejected(decision_id, RejectionStage::Tier4Llm, &reason, Some(&reason))
                            .await?;
                        self.state.finish_cycle().await;
                        return Ok(());
                    }
                    Err(e) => {
                        self.tier_recovery.record_failure("strategic_gate").await;
                        let reason = format!("LLM_API_ERROR: {e}");
                        warn!(%pair, error = %e, "strategic gate call failed, degrading to reject");
                        self.store
                            .mark_decision_rejected(decision_id, RejectionStage::Tier4Llm, &reason, None)
                            .await?;
                        self.state.finish_cycle().await;
                        return Ok(());
                    }
                }
            }
        }

        self.state.enter_stage("risk_validation").await;
        let portfolio_result = match self.portfolio_risk.check(pair, &params, &config.portfolio_risk).await {
            Ok(result) => {
                self.tier_recovery.record_success("portfolio_risk").await;
                result
            }
            Err(e) => {
                self.tier_recovery.record_failure("portfolio_risk").await;
                return Err(e);
            }
        };
        if !portfolio_result.passed {
            let reason = portfolio_result
                .reason
                .unwrap_or_else(|| "portfolio risk limits violated".to_string());
            self.store
                .mark_decision_rejected(decision_id, RejectionStage::Tier5PortfolioRisk, &reason, None)
                .await?;
            self.state.finish_cycle().await;
            return Ok(());
        }

        self.state.enter_stage("trade_execution").await;
        let side = match prediction.class {
            Signal3::Buy => Side::Buy,
            Signal3::Sell => Side::Sell,
            Signal3::Hold => unreachable!("held signals return earlier"),
        };

        let open_result = match self.position_manager.open(pair, side, &params, strategic_reasoning).await {
            Ok(result) => {
                self.tier_recovery.record_success("position_manager").await;
                result
            }
            Err(e) => {
                self.tier_recovery.record_failure("position_manager").await;
                return Err(e);
            }
        };
        match open_result {
            Some(position) => {
                self.store.mark_decision_executed(decision_id, &position.order_id).await?;
                info!(%pair, side = %side, position_id = %position.id, "pipeline opened a position");
            }
            None => {
                self.store
                    .mark_decision_rejected(
                        decision_id,
                        RejectionStage::Tier5ExecutionFailed,
                        "entry order failed",
                        None,
                    )
                    .await?;
            }
        }

        self.state.finish_cycle().await;
        Ok(())
    }

    /// Re-runs the portfolio risk check against the current config
    /// snapshot, for the health monitor's catch-up sweep over decisions
    /// that were sized but never executed or rejected.
    pub async fn portfolio_risk_check(
        &self,
        pair: Pair,
        params: &crate::types::TradeParameters,
    ) -> anyhow::Result<crate::risk::PortfolioRiskResult> {
        let config = self.runtime_config.snapshot().await;
        self.portfolio_risk.check(pair, params, &config.portfolio_risk).await
    }

    /// Exposes the position manager and state for components (the
    /// catch-up sweep) that execute decisions outside the normal cycle.
    pub fn position_manager(&self) -> &Arc<PositionManager> {
        &self.position_manager
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    async fn fetch_with_retry(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
        open_time: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Option<Candle>> {
        for attempt in 1..=CANDLE_RETRY_ATTEMPTS {
            if let Some(candle) = self.store.get_candle(pair, timeframe, open_time).await? {
                return Ok(Some(candle));
            }
            if attempt < CANDLE_RETRY_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(CANDLE_RETRY_DELAY_MS)).await;
            }
        }
        Ok(None)
    }

    async fn load_daily_buffer(&self, pair: Pair) -> anyhow::Result<CandleBuffer> {
        let candles = self.store.get_recent_candles(pair, TimeFrame::D1, CANDLE_BUFFER_SIZE as i64).await?;
        let mut buffer = CandleBuffer::new(CANDLE_BUFFER_SIZE);
        for candle in candles {
            buffer.push(candle);
        }
        Ok(buffer)
    }

    async fn load_candle_buffers(&self, pair: Pair) -> anyhow::Result<HashMap<TimeFrame, CandleBuffer>> {
        let mut buffers = HashMap::new();
        for timeframe in [TimeFrame::M1, TimeFrame::M5, TimeFrame::M15, TimeFrame::H1, TimeFrame::D1] {
            let candles = self.store.get_recent_candles(pair, timeframe, CANDLE_BUFFER_SIZE as i64).await?;
            let mut buffer = CandleBuffer::new(CANDLE_BUFFER_SIZE);
            for candle in candles {
                buffer.push(candle);
            }
            buffers.insert(timeframe, buffer);
        }
        Ok(buffers)
    }
}

/// A simple realized-volatility proxy from recent 1m closes, used as the
/// sizer's stand-in volatility forecast until a dedicated forecaster
/// exists; expressed as a percentage.
fn feature_volatility_estimate(candles_by_timeframe: &HashMap<TimeFrame, CandleBuffer>) -> rust_decimal::Decimal {
    use rust_decimal::prelude::ToPrimitive;

    let Some(buffer) = candles_by_timeframe.get(&TimeFrame::M1) else {
        return rust_decimal::Decimal::from(2);
    };
    let closes: Vec<f64> = buffer
        .candles
        .iter()
        .rev()
        .take(30)
        .filter_map(|c| c.close.to_f64())
        .collect();
    if closes.len() < 2 {
        return rust_decimal::Decimal::from(2);
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[0] - w[1]) / w[1])
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev_pct = variance.sqrt() * 100.0;
    rust_decimal::Decimal::from_f64_retain(std_dev_pct.clamp(0.1, 20.0)).unwrap_or(rust_decimal::Decimal::from(2))
}
