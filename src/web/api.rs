use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::Engine;
use crate::types::{Pair, TradingMode};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub trading_mode: String,
    pub pairs: Vec<String>,
    #[serde(default)]
    pub auto_trading_enabled: bool,
}

/// Initializes and launches the engine. Rejects LIVE directly — switching
/// to LIVE is a separate, confirmed step via `/mode/set` once the engine
/// is already running in PAPER.
pub async fn post_engine_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    if state.running_engine().await.is_some() {
        return (StatusCode::CONFLICT, Json(json!({"error": "engine already running"}))).into_response();
    }

    let trading_mode = match TradingMode::from_str(&req.trading_mode) {
        Some(TradingMode::Live) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "cannot start directly in LIVE mode, start in PAPER then use /mode/set"})),
            )
                .into_response();
        }
        Some(mode) => mode,
        None => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": format!("invalid trading_mode: {}", req.trading_mode)}))).into_response();
        }
    };

    let mut pairs = Vec::with_capacity(req.pairs.len());
    for p in &req.pairs {
        match Pair::from_str(p) {
            Some(pair) => pairs.push(pair),
            None => return (StatusCode::BAD_REQUEST, Json(json!({"error": format!("invalid pair: {}", p)}))).into_response(),
        }
    }
    if pairs.is_empty() {
        pairs = Pair::all();
    }

    if let Err(e) = state
        .mode_orchestrator
        .set_mode(trading_mode, false, "engine start".to_string())
        .await
    {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
    }

    let engine = match Engine::new(&state.config, state.store.clone(), state.runtime_config.clone(), pairs, req.auto_trading_enabled).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "failed to construct engine");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response();
        }
    };

    if let Err(e) = engine.start().await {
        error!(error = %e, "failed to start engine");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response();
    }

    *state.engine.write().await = Some(engine.clone());
    info!("engine started via control surface");

    match engine.status().await {
        Ok(status) => (StatusCode::OK, Json(json!({"status": "ok", "engine": status}))).into_response(),
        Err(e) => (StatusCode::OK, Json(json!({"status": "ok", "warning": e.to_string()}))).into_response(),
    }
}

pub async fn post_engine_stop(State(state): State<AppState>) -> impl IntoResponse {
    let Some(engine) = state.engine.write().await.take() else {
        return (StatusCode::CONFLICT, Json(json!({"error": "engine not running"}))).into_response();
    };
    engine.shutdown();
    info!("engine stop requested via control surface");
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

pub async fn get_engine_status(State(state): State<AppState>) -> impl IntoResponse {
    let Some(engine) = state.running_engine().await else {
        return (StatusCode::OK, Json(json!({"status": "STOPPED"}))).into_response();
    };
    match engine.status().await {
        Ok(status) => (StatusCode::OK, Json(json!(status))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn with_running_engine<F>(state: &AppState, f: F) -> impl IntoResponse
where
    F: FnOnce(&Engine),
{
    match state.running_engine().await {
        Some(engine) => {
            f(&engine);
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(json!({"error": "engine not running"}))).into_response(),
    }
}

pub async fn post_auto_trading_enable(State(state): State<AppState>) -> impl IntoResponse {
    with_running_engine(&state, |engine| engine.set_auto_trading(true)).await.into_response()
}

pub async fn post_auto_trading_disable(State(state): State<AppState>) -> impl IntoResponse {
    with_running_engine(&state, |engine| engine.set_auto_trading(false)).await.into_response()
}

pub async fn post_emergency_stop(State(state): State<AppState>) -> impl IntoResponse {
    match state.running_engine().await {
        Some(engine) => {
            engine.emergency_stop().await;
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(json!({"error": "engine not running"}))).into_response(),
    }
}

pub async fn post_emergency_stop_clear(State(state): State<AppState>) -> impl IntoResponse {
    with_running_engine(&state, |engine| engine.clear_emergency_stop()).await.into_response()
}

// === Mode endpoints ===

pub async fn get_mode_current(State(state): State<AppState>) -> impl IntoResponse {
    match state.mode_orchestrator.get_mode_state().await {
        Ok(mode) => (StatusCode::OK, Json(mode)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
    #[serde(default)]
    pub confirmed: bool,
    pub reason: String,
}

pub async fn post_mode_set(
    State(state): State<AppState>,
    Json(req): Json<SetModeRequest>,
) -> impl IntoResponse {
    let Some(mode) = TradingMode::from_str(&req.mode) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": format!("invalid mode: {}", req.mode)}))).into_response();
    };
    match state.mode_orchestrator.set_mode(mode, req.confirmed, req.reason).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ModeHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

pub async fn get_mode_history(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ModeHistoryQuery>,
) -> impl IntoResponse {
    match state.mode_orchestrator.get_mode_history(query.limit).await {
        Ok(history) => (StatusCode::OK, Json(history)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

// === Health check ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
