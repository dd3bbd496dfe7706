use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

/// The control surface: engine lifecycle, auto-trading toggle, emergency
/// stop, and trading mode. No dashboard rendering — that surface belongs
/// to a different audience than this process serves.
pub async fn start_control_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/engine/start", post(api::post_engine_start))
        .route("/engine/stop", post(api::post_engine_stop))
        .route("/engine/status", get(api::get_engine_status))
        .route("/engine/auto-trading/enable", post(api::post_auto_trading_enable))
        .route("/engine/auto-trading/disable", post(api::post_auto_trading_disable))
        .route("/engine/emergency-stop", post(api::post_emergency_stop))
        .route("/engine/emergency-stop/clear", post(api::post_emergency_stop_clear))
        .route("/mode/current", get(api::get_mode_current))
        .route("/mode/set", post(api::post_mode_set))
        .route("/mode/history", get(api::get_mode_history))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "control server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
