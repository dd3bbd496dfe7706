use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::Store;
use crate::types::{
    Pair, Position, PositionCloseAction, PositionStatus, Side, TimeFrame, TradeParameters,
};

use super::execution_router::ExecutionRouter;

/// Opens, monitors and closes positions (Tier 5). Monitoring checks
/// stop-loss before take-profit when a single price sample crosses both,
/// and falls back to the most recent 1m/5m candle, then gives up, when
/// the live price cache is stale.
pub struct PositionManager {
    store: Arc<Store>,
    router: Arc<ExecutionRouter>,
    price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, DateTime<Utc>)>>>,
}

const PRICE_CACHE_MAX_AGE: chrono::Duration = chrono::Duration::seconds(5);

impl PositionManager {
    pub fn new(
        store: Arc<Store>,
        router: Arc<ExecutionRouter>,
        price_cache: Arc<tokio::sync::RwLock<HashMap<Pair, (Decimal, DateTime<Utc>)>>>,
    ) -> Self {
        Self {
            store,
            router,
            price_cache,
        }
    }

    /// Cache entry younger than 5s, else most recent 1m/5m candle younger
    /// than 10 minutes, else `None` — the caller must skip pricing this
    /// pair for the tick rather than act on a stale value.
    async fn current_price(&self, pair: Pair) -> anyhow::Result<Option<Decimal>> {
        if let Some((price, at)) = self.price_cache.read().await.get(&pair).copied() {
            if Utc::now() - at < PRICE_CACHE_MAX_AGE {
                return Ok(Some(price));
            }
        }

        for timeframe in [TimeFrame::M1, TimeFrame::M5] {
            let recent = self.store.get_recent_candles(pair, timeframe, 1).await?;
            if let Some(candle) = recent.into_iter().next() {
                if !candle.is_stale(Utc::now()) {
                    return Ok(Some(candle.close));
                }
            }
        }

        Ok(None)
    }

    /// Places the entry order and, on success, persists the resulting
    /// position. Returns `Ok(None)` when the order itself failed — the
    /// caller marks the originating decision `TIER5_EXECUTION_FAILED`.
    pub async fn open(
        &self,
        pair: Pair,
        side: Side,
        params: &TradeParameters,
        strategic_reasoning: String,
    ) -> anyhow::Result<Option<Position>> {
        let Some(price) = self.current_price(pair).await? else {
            warn!(%pair, "no price available to size entry order, skipping");
            return Ok(None);
        };

        let quantity = params.position_size_zar / price;
        let order = self
            .router
            .place_market_order(pair, side, quantity)
            .await?;

        if !order.success {
            warn!(%pair, error = ?order.error, "entry order failed");
            return Ok(None);
        }

        let position = Position::open(
            pair,
            side,
            order.fill_price,
            order.quantity,
            params.leverage,
            params.stop_loss_pct,
            params.take_profit_pct,
            strategic_reasoning,
            order.order_id.clone(),
        );
        self.store.insert_position(&position).await?;
        info!(
            pair = %pair, side = %side, entry_price = %position.entry_price,
            stop_loss = %position.stop_loss_price, take_profit = %position.take_profit_price,
            "position opened"
        );
        Ok(Some(position))
    }

    /// One monitor tick: evaluates every open position against the
    /// current price and returns the close actions to perform. Stop-loss
    /// is checked first, then take-profit, then the 24h timeout.
    pub async fn evaluate_open_positions(&self) -> anyhow::Result<Vec<PositionCloseAction>> {
        let open_positions = self.store.get_open_positions().await?;
        let mut actions = Vec::new();
        let now = Utc::now();

        for position in open_positions {
            let Some(price) = self.current_price(position.pair).await? else {
                continue;
            };

            let status = if position.is_stop_loss_crossed(price) {
                Some(PositionStatus::StopLoss)
            } else if position.is_take_profit_crossed(price) {
                Some(PositionStatus::TakeProfit)
            } else if position.is_timed_out(now) {
                Some(PositionStatus::Timeout)
            } else {
                None
            };

            if let Some(status) = status {
                actions.push(PositionCloseAction {
                    position_id: position.id,
                    status,
                    current_price: price,
                });
            }
        }

        Ok(actions)
    }

    /// Closes `position_id` at `current_price` with the given reason,
    /// updating the portfolio state with the realized P&L. Reused for
    /// stop-loss/take-profit/timeout triggers and operator-driven
    /// emergency closes alike.
    pub async fn close(
        &self,
        position_id: &str,
        status: PositionStatus,
        current_price: Decimal,
        reason: &str,
    ) -> anyhow::Result<Option<Position>> {
        let open_positions = self.store.get_open_positions().await?;
        let Some(mut position) = open_positions.into_iter().find(|p| p.id == position_id) else {
            warn!(position_id, "close requested for position that is not open");
            return Ok(None);
        };

        let closing_side = position.side.opposite();
        let exit_order = self
            .router
            .place_market_order(position.pair, closing_side, position.quantity)
            .await?;
        let exit_price = if exit_order.success {
            exit_order.fill_price
        } else {
            warn!(position_id, error = ?exit_order.error, "exit order failed, closing at last observed price");
            current_price
        };

        position.close(exit_price, status, reason);
        self.store.close_position(&position).await?;

        let mut portfolio = self
            .store
            .get_portfolio_state()
            .await?
            .unwrap_or_else(|| crate::types::PortfolioState::initial(Decimal::ZERO));
        portfolio.apply_pnl(position.pnl_zar.unwrap_or(Decimal::ZERO));
        self.store.save_portfolio_state(&portfolio).await?;

        info!(
            position_id, pair = %position.pair, status = status.as_str(),
            pnl_zar = ?position.pnl_zar, pnl_pct = ?position.pnl_pct,
            drawdown_pct = %portfolio.current_drawdown_pct,
            "position closed"
        );
        Ok(Some(position))
    }

    /// Closes every currently open position with `EMERGENCY_CLOSE`,
    /// used only by the engine's emergency-stop path.
    pub async fn close_all_for_emergency_stop(&self) -> anyhow::Result<Vec<Position>> {
        let open_positions = self.store.get_open_positions().await?;
        let mut closed = Vec::with_capacity(open_positions.len());
        for position in open_positions {
            let Some(price) = self.current_price(position.pair).await?.or(Some(position.entry_price)) else {
                continue;
            };
            if let Some(position) = self
                .close(&position.id, PositionStatus::EmergencyClose, price, "emergency stop")
                .await?
            {
                closed.push(position);
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mode_orchestrator::ModeOrchestrator;
    use crate::engine::paper_client::PaperClient;
    use rust_decimal_macros::dec;

    async fn manager_with_price(pair: Pair, price: Decimal) -> PositionManager {
        let store = Arc::new(Store::new("sqlite::memory:").await.unwrap());
        let mode_orchestrator = Arc::new(ModeOrchestrator::new(store.clone()));
        let runtime_config = Arc::new(crate::config::RuntimeConfigManager::new(
            crate::config::RuntimeConfig::default(),
        ));
        let price_cache = Arc::new(tokio::sync::RwLock::new(HashMap::new()));
        price_cache.write().await.insert(pair, (price, Utc::now()));
        let paper_client = Arc::new(PaperClient::new(price_cache.clone(), dec!(100000)));
        let router = Arc::new(ExecutionRouter::new(
            store.clone(),
            mode_orchestrator,
            runtime_config,
            paper_client,
            None,
            price_cache.clone(),
        ));
        PositionManager::new(store, router, price_cache)
    }

    #[tokio::test]
    async fn opening_a_position_persists_it_with_derived_stop_and_take_prices() {
        let manager = manager_with_price(Pair::BTCZAR, dec!(850000)).await;
        let params = TradeParameters {
            position_size_zar: dec!(5000),
            leverage: dec!(1),
            stop_loss_pct: dec!(2),
            take_profit_pct: dec!(4),
            max_loss_zar: dec!(100),
            expected_gain_zar: dec!(200),
        };
        let position = manager
            .open(Pair::BTCZAR, Side::Buy, &params, "test".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert!(position.stop_loss_price < position.entry_price);
        assert!(position.take_profit_price > position.entry_price);
    }

    #[tokio::test]
    async fn closing_a_position_updates_portfolio_drawdown() {
        let manager = manager_with_price(Pair::BTCZAR, dec!(850000)).await;
        let params = TradeParameters {
            position_size_zar: dec!(5000),
            leverage: dec!(1),
            stop_loss_pct: dec!(2),
            take_profit_pct: dec!(4),
            max_loss_zar: dec!(100),
            expected_gain_zar: dec!(200),
        };
        let position = manager
            .open(Pair::BTCZAR, Side::Buy, &params, "test".to_string())
            .await
            .unwrap()
            .unwrap();

        manager
            .price_cache
            .write()
            .await
            .insert(Pair::BTCZAR, (dec!(832500), Utc::now()));

        let closed = manager
            .close(&position.id, PositionStatus::StopLoss, dec!(832500), "stop loss")
            .await
            .unwrap()
            .unwrap();
        assert!(closed.pnl_zar.unwrap() < Decimal::ZERO);

        let portfolio = manager.store.get_portfolio_state().await.unwrap().unwrap();
        assert!(portfolio.current_drawdown_pct > Decimal::ZERO);
    }
}
