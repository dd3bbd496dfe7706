pub mod recovery;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::types::{
    Candle, FeatureVector, ModeHistoryEntry, ModeState, Pair, Position, PositionStatus,
    Prediction, RejectionStage, RiskDecision, Side, Signal3, TimeFrame, TradingMode,
};

pub use recovery::with_retry;

/// Typed operations on candles, features, predictions, decisions, positions,
/// portfolio and mode. Each concurrent loop opens its own pool checkout;
/// there are no long-running transactions and no migration framework —
/// schema evolves by additive `CREATE TABLE IF NOT EXISTS`/`ALTER TABLE`.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("opening store at {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_ohlc (
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time TEXT NOT NULL,
                close_time TEXT NOT NULL,
                open_price TEXT NOT NULL,
                high_price TEXT NOT NULL,
                low_price TEXT NOT NULL,
                close_price TEXT NOT NULL,
                volume TEXT NOT NULL,
                num_trades INTEGER NOT NULL,
                PRIMARY KEY (pair, timeframe, open_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_market_ohlc_pair_tf_time ON market_ohlc(pair, timeframe, open_time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engineered_features (
                pair TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                feature_values TEXT NOT NULL,
                feature_names TEXT NOT NULL,
                PRIMARY KEY (pair, computed_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ml_predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                model_version TEXT NOT NULL,
                class TEXT NOT NULL,
                p_buy REAL NOT NULL,
                p_sell REAL NOT NULL,
                p_hold REAL NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aether_risk_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                signal TEXT NOT NULL,
                ml_confidence REAL NOT NULL,
                position_size_zar TEXT NOT NULL,
                leverage TEXT NOT NULL,
                stop_loss_pct TEXT NOT NULL,
                take_profit_pct TEXT NOT NULL,
                executed INTEGER NOT NULL DEFAULT 0,
                execution_id TEXT,
                rejected_by TEXT,
                rejection_reason TEXT,
                llm_rejection_reasoning TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_decisions_pending ON aether_risk_decisions(executed, rejected_by, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                quantity TEXT NOT NULL,
                position_value_zar TEXT NOT NULL,
                leverage TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                take_profit_price TEXT NOT NULL,
                exit_price TEXT,
                exit_time TEXT,
                pnl_pct TEXT,
                pnl_zar TEXT,
                status TEXT NOT NULL,
                close_reason TEXT,
                strategic_reasoning TEXT NOT NULL,
                order_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_value_zar TEXT NOT NULL,
                peak_value_zar TEXT NOT NULL,
                current_drawdown_pct TEXT NOT NULL,
                max_drawdown_pct TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_mode_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                current_mode TEXT NOT NULL,
                last_changed_at TEXT NOT NULL,
                changed_by TEXT NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_mode_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_mode TEXT NOT NULL,
                to_mode TEXT NOT NULL,
                changed_at TEXT NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ml_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_type TEXT NOT NULL,
                version TEXT NOT NULL,
                trained_at TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                model_path TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ml_models_active ON ml_models(model_type, is_active)",
        )
        .execute(&self.pool)
        .await?;

        // Additive evolution: ignore "duplicate column" if this has already run.
        let _ = sqlx::query("ALTER TABLE positions ADD COLUMN order_id TEXT NOT NULL DEFAULT ''")
            .execute(&self.pool)
            .await;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ---- candles ----------------------------------------------------

    pub async fn insert_candle_ignore_conflict(&self, candle: &Candle) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO market_ohlc
                (pair, timeframe, open_time, close_time, open_price, high_price, low_price, close_price, volume, num_trades)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candle.pair.as_str())
        .bind(candle.timeframe.as_str())
        .bind(candle.open_time.to_rfc3339())
        .bind(candle.close_time.to_rfc3339())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume.to_string())
        .bind(candle.num_trades as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_aggregate_candle(&self, candle: &Candle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_ohlc
                (pair, timeframe, open_time, close_time, open_price, high_price, low_price, close_price, volume, num_trades)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pair, timeframe, open_time) DO UPDATE SET
                close_time = excluded.close_time,
                close_price = excluded.close_price,
                high_price = excluded.high_price,
                low_price = excluded.low_price,
                volume = excluded.volume,
                num_trades = excluded.num_trades
            "#,
        )
        .bind(candle.pair.as_str())
        .bind(candle.timeframe.as_str())
        .bind(candle.open_time.to_rfc3339())
        .bind(candle.close_time.to_rfc3339())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume.to_string())
        .bind(candle.num_trades as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_candle(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
        open_time: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        let row = sqlx::query(
            "SELECT pair, timeframe, open_time, close_time, open_price, high_price, low_price, close_price, volume, num_trades FROM market_ohlc WHERE pair = ? AND timeframe = ? AND open_time = ?",
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .bind(open_time.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_candle).transpose()
    }

    pub async fn get_recent_candles(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
        limit: i64,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT pair, timeframe, open_time, close_time, open_price, high_price, low_price, close_price, volume, num_trades FROM market_ohlc WHERE pair = ? AND timeframe = ? ORDER BY open_time DESC LIMIT ?",
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut candles = rows
            .into_iter()
            .map(row_to_candle)
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    /// Source candles for one aggregation period, ordered oldest-first.
    pub async fn get_candles_in_range(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT pair, timeframe, open_time, close_time, open_price, high_price, low_price, close_price, volume, num_trades FROM market_ohlc WHERE pair = ? AND timeframe = ? AND open_time >= ? AND open_time < ? ORDER BY open_time ASC",
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_candle).collect()
    }

    pub async fn last_seen_open_time(
        &self,
        pair: Pair,
        timeframe: TimeFrame,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT open_time FROM market_ohlc WHERE pair = ? AND timeframe = ? ORDER BY open_time DESC LIMIT 1",
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(r) => Some(parse_dt(r.get::<String, _>("open_time"))?),
            None => None,
        })
    }

    // ---- feature vectors ---------------------------------------------

    pub async fn insert_feature_vector(&self, fv: &FeatureVector) -> Result<()> {
        let values = serde_json::to_string(&fv.values)?;
        let names = serde_json::to_string(&fv.names)?;
        sqlx::query(
            "INSERT OR REPLACE INTO engineered_features (pair, computed_at, feature_values, feature_names) VALUES (?, ?, ?, ?)",
        )
        .bind(fv.pair.as_str())
        .bind(fv.computed_at.to_rfc3339())
        .bind(values)
        .bind(names)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_latest_feature_vector(&self, pair: Pair) -> Result<Option<FeatureVector>> {
        let row = sqlx::query(
            "SELECT pair, computed_at, feature_values, feature_names FROM engineered_features WHERE pair = ? ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(pair.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(r) => {
                let values: Vec<f64> = serde_json::from_str(&r.get::<String, _>("feature_values"))?;
                let names: Vec<String> = serde_json::from_str(&r.get::<String, _>("feature_names"))?;
                Ok(Some(FeatureVector::new(
                    pair,
                    parse_dt(r.get::<String, _>("computed_at"))?,
                    values,
                    names,
                )))
            }
        }
    }

    // ---- predictions --------------------------------------------------

    pub async fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        sqlx::query(
            "INSERT INTO ml_predictions (pair, model_version, class, p_buy, p_sell, p_hold, confidence, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(prediction.pair.as_str())
        .bind(&prediction.model_version)
        .bind(prediction.class.as_str())
        .bind(prediction.p_buy)
        .bind(prediction.p_sell)
        .bind(prediction.p_hold)
        .bind(prediction.confidence)
        .bind(prediction.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- risk decisions -------------------------------------------------

    pub async fn insert_pending_decision(
        &self,
        pair: Pair,
        signal: Signal3,
        ml_confidence: f64,
        position_size_zar: Decimal,
        leverage: Decimal,
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO aether_risk_decisions
                (pair, signal, ml_confidence, position_size_zar, leverage, stop_loss_pct, take_profit_pct, executed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(pair.as_str())
        .bind(signal.as_str())
        .bind(ml_confidence)
        .bind(position_size_zar.to_string())
        .bind(leverage.to_string())
        .bind(stop_loss_pct.to_string())
        .bind(take_profit_pct.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_rejected_decision(
        &self,
        pair: Pair,
        signal: Signal3,
        ml_confidence: f64,
        rejected_by: RejectionStage,
        rejection_reason: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO aether_risk_decisions
                (pair, signal, ml_confidence, position_size_zar, leverage, stop_loss_pct, take_profit_pct, executed, rejected_by, rejection_reason, created_at)
            VALUES (?, ?, ?, '0', '0', '0', '0', 0, ?, ?, ?)
            "#,
        )
        .bind(pair.as_str())
        .bind(signal.as_str())
        .bind(ml_confidence)
        .bind(rejected_by.as_str())
        .bind(rejection_reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn mark_decision_executed(&self, id: i64, execution_id: &str) -> Result<()> {
        sqlx::query("UPDATE aether_risk_decisions SET executed = 1, execution_id = ? WHERE id = ?")
            .bind(execution_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_decision_rejected(
        &self,
        id: i64,
        rejected_by: RejectionStage,
        reason: &str,
        llm_reasoning: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE aether_risk_decisions SET rejected_by = ?, rejection_reason = ?, llm_rejection_reasoning = ? WHERE id = ?",
        )
        .bind(rejected_by.as_str())
        .bind(reason)
        .bind(llm_reasoning)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_decision_params(
        &self,
        id: i64,
        position_size_zar: Decimal,
        leverage: Decimal,
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE aether_risk_decisions SET position_size_zar = ?, leverage = ?, stop_loss_pct = ?, take_profit_pct = ? WHERE id = ?",
        )
        .bind(position_size_zar.to_string())
        .bind(leverage.to_string())
        .bind(stop_loss_pct.to_string())
        .bind(take_profit_pct.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows where `executed=false AND rejected_by IS NULL AND created_at >
    /// now-24h`, reaped by the health loop's catch-up sweep.
    pub async fn get_pending_decisions(&self, limit: i64) -> Result<Vec<RiskDecision>> {
        let cutoff = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT id, pair, signal, ml_confidence, position_size_zar, leverage, stop_loss_pct, take_profit_pct,
                   executed, execution_id, rejected_by, rejection_reason, llm_rejection_reasoning, created_at
            FROM aether_risk_decisions
            WHERE executed = 0 AND rejected_by IS NULL AND created_at > ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_decision).collect()
    }

    // ---- positions -------------------------------------------------------

    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, pair, side, entry_price, entry_time, quantity, position_value_zar, leverage,
                 stop_loss_price, take_profit_price, exit_price, exit_time, pnl_pct, pnl_zar,
                 status, close_reason, strategic_reasoning, order_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?, NULL, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(position.pair.as_str())
        .bind(position.side.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.entry_time.to_rfc3339())
        .bind(position.quantity.to_string())
        .bind(position.position_value_zar.to_string())
        .bind(position.leverage.to_string())
        .bind(position.stop_loss_price.to_string())
        .bind(position.take_profit_price.to_string())
        .bind(position.status.as_str())
        .bind(&position.strategic_reasoning)
        .bind(&position.order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET exit_price = ?, exit_time = ?, pnl_pct = ?, pnl_zar = ?, status = ?, close_reason = ? WHERE id = ?",
        )
        .bind(position.exit_price.map(|d| d.to_string()))
        .bind(position.exit_time.map(|t| t.to_rfc3339()))
        .bind(position.pnl_pct.map(|d| d.to_string()))
        .bind(position.pnl_zar.map(|d| d.to_string()))
        .bind(position.status.as_str())
        .bind(&position.close_reason)
        .bind(&position.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, side, entry_price, entry_time, quantity, position_value_zar, leverage,
                   stop_loss_price, take_profit_price, exit_price, exit_time, pnl_pct, pnl_zar,
                   status, close_reason, strategic_reasoning, order_id
            FROM positions WHERE status = 'OPEN'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_position).collect()
    }

    pub async fn get_positions_closed_since(&self, since: DateTime<Utc>) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, side, entry_price, entry_time, quantity, position_value_zar, leverage,
                   stop_loss_price, take_profit_price, exit_price, exit_time, pnl_pct, pnl_zar,
                   status, close_reason, strategic_reasoning, order_id
            FROM positions WHERE status != 'OPEN' AND exit_time >= ?
            "#,
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_position).collect()
    }

    /// Most recent closed positions for one pair, newest first — the feature
    /// engineer's source for recent win-rate/streak context features.
    pub async fn get_recent_closed_positions(&self, pair: Pair, limit: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, side, entry_price, entry_time, quantity, position_value_zar, leverage,
                   stop_loss_price, take_profit_price, exit_price, exit_time, pnl_pct, pnl_zar,
                   status, close_reason, strategic_reasoning, order_id
            FROM positions WHERE status != 'OPEN' AND pair = ?
            ORDER BY exit_time DESC LIMIT ?
            "#,
        )
        .bind(pair.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_position).collect()
    }

    pub async fn count_positions_opened_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM positions WHERE entry_time >= ?")
            .bind(since.to_rfc3339())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn current_exposure_to_pair(&self, pair: Pair) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(CAST(position_value_zar AS REAL)), 0) as exposure FROM positions WHERE status = 'OPEN' AND pair = ?",
        )
        .bind(pair.as_str())
        .fetch_one(&self.pool)
        .await?;
        let exposure: f64 = row.get("exposure");
        Ok(Decimal::try_from(exposure).unwrap_or(Decimal::ZERO))
    }

    // ---- portfolio state ---------------------------------------------------

    pub async fn get_portfolio_state(&self) -> Result<Option<crate::types::PortfolioState>> {
        let row = sqlx::query(
            "SELECT total_value_zar, peak_value_zar, current_drawdown_pct, max_drawdown_pct, last_updated FROM portfolio_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(r) => Ok(Some(crate::types::PortfolioState {
                total_value_zar: Decimal::from_str(&r.get::<String, _>("total_value_zar"))?,
                peak_value_zar: Decimal::from_str(&r.get::<String, _>("peak_value_zar"))?,
                current_drawdown_pct: Decimal::from_str(&r.get::<String, _>("current_drawdown_pct"))?,
                max_drawdown_pct: Decimal::from_str(&r.get::<String, _>("max_drawdown_pct"))?,
                last_updated: parse_dt(r.get::<String, _>("last_updated"))?,
            })),
        }
    }

    pub async fn save_portfolio_state(&self, state: &crate::types::PortfolioState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_state (id, total_value_zar, peak_value_zar, current_drawdown_pct, max_drawdown_pct, last_updated)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_value_zar = excluded.total_value_zar,
                peak_value_zar = excluded.peak_value_zar,
                current_drawdown_pct = excluded.current_drawdown_pct,
                max_drawdown_pct = excluded.max_drawdown_pct,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(state.total_value_zar.to_string())
        .bind(state.peak_value_zar.to_string())
        .bind(state.current_drawdown_pct.to_string())
        .bind(state.max_drawdown_pct.to_string())
        .bind(state.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- mode ---------------------------------------------------------------

    pub async fn get_mode_state(&self) -> Result<ModeState> {
        let row = sqlx::query(
            "SELECT current_mode, last_changed_at, changed_by, reason FROM trading_mode_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(ModeState {
                current_mode: TradingMode::from_str(&r.get::<String, _>("current_mode"))
                    .ok_or_else(|| anyhow!("invalid stored mode"))?,
                last_changed_at: parse_dt(r.get::<String, _>("last_changed_at"))?,
                changed_by: r.get("changed_by"),
                reason: r.get("reason"),
            }),
            None => {
                let initial = ModeState::initial();
                self.save_mode_state(&initial).await?;
                Ok(initial)
            }
        }
    }

    pub async fn save_mode_state(&self, state: &ModeState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_mode_state (id, current_mode, last_changed_at, changed_by, reason)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                current_mode = excluded.current_mode,
                last_changed_at = excluded.last_changed_at,
                changed_by = excluded.changed_by,
                reason = excluded.reason
            "#,
        )
        .bind(state.current_mode.as_str())
        .bind(state.last_changed_at.to_rfc3339())
        .bind(&state.changed_by)
        .bind(&state.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_mode_history(&self, entry: &ModeHistoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO trading_mode_history (from_mode, to_mode, changed_at, reason) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.from_mode.as_str())
        .bind(entry.to_mode.as_str())
        .bind(entry.changed_at.to_rfc3339())
        .bind(&entry.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_mode_history(&self, limit: i64) -> Result<Vec<ModeHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT from_mode, to_mode, changed_at, reason FROM trading_mode_history ORDER BY changed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(ModeHistoryEntry {
                    from_mode: TradingMode::from_str(&r.get::<String, _>("from_mode"))
                        .ok_or_else(|| anyhow!("invalid mode in history"))?,
                    to_mode: TradingMode::from_str(&r.get::<String, _>("to_mode"))
                        .ok_or_else(|| anyhow!("invalid mode in history"))?,
                    changed_at: parse_dt(r.get::<String, _>("changed_at"))?,
                    reason: r.get("reason"),
                })
            })
            .collect()
    }
}

fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))
}

fn row_to_candle(row: sqlx::sqlite::SqliteRow) -> Result<Candle> {
    Ok(Candle {
        pair: Pair::from_str(&row.get::<String, _>("pair")).ok_or_else(|| anyhow!("bad pair"))?,
        timeframe: TimeFrame::from_str(&row.get::<String, _>("timeframe"))
            .ok_or_else(|| anyhow!("bad timeframe"))?,
        open_time: parse_dt(row.get::<String, _>("open_time"))?,
        close_time: parse_dt(row.get::<String, _>("close_time"))?,
        open: Decimal::from_str(&row.get::<String, _>("open_price"))?,
        high: Decimal::from_str(&row.get::<String, _>("high_price"))?,
        low: Decimal::from_str(&row.get::<String, _>("low_price"))?,
        close: Decimal::from_str(&row.get::<String, _>("close_price"))?,
        volume: Decimal::from_str(&row.get::<String, _>("volume"))?,
        num_trades: row.get::<i64, _>("num_trades") as u64,
    })
}

fn row_to_decision(row: sqlx::sqlite::SqliteRow) -> Result<RiskDecision> {
    Ok(RiskDecision {
        id: row.get("id"),
        pair: Pair::from_str(&row.get::<String, _>("pair")).ok_or_else(|| anyhow!("bad pair"))?,
        signal: Signal3::from_str(&row.get::<String, _>("signal")).ok_or_else(|| anyhow!("bad signal"))?,
        ml_confidence: row.get("ml_confidence"),
        position_size_zar: Decimal::from_str(&row.get::<String, _>("position_size_zar"))?,
        leverage: Decimal::from_str(&row.get::<String, _>("leverage"))?,
        stop_loss_pct: Decimal::from_str(&row.get::<String, _>("stop_loss_pct"))?,
        take_profit_pct: Decimal::from_str(&row.get::<String, _>("take_profit_pct"))?,
        executed: row.get::<i64, _>("executed") != 0,
        execution_id: row.get("execution_id"),
        rejected_by: row
            .get::<Option<String>, _>("rejected_by")
            .and_then(|s| RejectionStage::from_str(&s)),
        rejection_reason: row.get("rejection_reason"),
        llm_rejection_reasoning: row.get("llm_rejection_reasoning"),
        created_at: parse_dt(row.get::<String, _>("created_at"))?,
    })
}

fn row_to_position(row: sqlx::sqlite::SqliteRow) -> Result<Position> {
    Ok(Position {
        id: row.get("id"),
        pair: Pair::from_str(&row.get::<String, _>("pair")).ok_or_else(|| anyhow!("bad pair"))?,
        side: parse_side(&row.get::<String, _>("side"))?,
        entry_price: Decimal::from_str(&row.get::<String, _>("entry_price"))?,
        entry_time: parse_dt(row.get::<String, _>("entry_time"))?,
        quantity: Decimal::from_str(&row.get::<String, _>("quantity"))?,
        position_value_zar: Decimal::from_str(&row.get::<String, _>("position_value_zar"))?,
        leverage: Decimal::from_str(&row.get::<String, _>("leverage"))?,
        stop_loss_price: Decimal::from_str(&row.get::<String, _>("stop_loss_price"))?,
        take_profit_price: Decimal::from_str(&row.get::<String, _>("take_profit_price"))?,
        exit_price: row
            .get::<Option<String>, _>("exit_price")
            .map(|s| Decimal::from_str(&s))
            .transpose()?,
        exit_time: row
            .get::<Option<String>, _>("exit_time")
            .map(parse_dt)
            .transpose()?,
        pnl_pct: row
            .get::<Option<String>, _>("pnl_pct")
            .map(|s| Decimal::from_str(&s))
            .transpose()?,
        pnl_zar: row
            .get::<Option<String>, _>("pnl_zar")
            .map(|s| Decimal::from_str(&s))
            .transpose()?,
        status: PositionStatus::from_str(&row.get::<String, _>("status"))
            .ok_or_else(|| anyhow!("bad position status"))?,
        close_reason: row.get("close_reason"),
        strategic_reasoning: row.get("strategic_reasoning"),
        order_id: row.get("order_id"),
    })
}

fn parse_side(s: &str) -> Result<Side> {
    match s {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(anyhow!("bad side: {other}")),
    }
}
