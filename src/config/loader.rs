use anyhow::{Context, Result};
use std::env;

use crate::types::TradingMode;

/// Boot-time configuration: connection strings and credentials that are
/// fixed for the life of the process. Adjustable knobs live in
/// `RuntimeConfig` instead, behind the config manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub valr_api_key: String,
    pub valr_api_secret: String,
    pub valr_base_url: String,
    pub valr_ws_base_url: String,
    pub database_url: String,
    pub web_port: u16,
    pub initial_mode: TradingMode,
    pub llm_api_key: Option<String>,
    pub log_level: String,
}

impl EngineConfig {
    /// Loads `.env` (if present) and then reads environment variables,
    /// falling back to sane defaults for anything not in LIVE mode.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let valr_api_key = env::var("VALR_API_KEY").unwrap_or_default();
        let valr_api_secret = env::var("VALR_API_SECRET").unwrap_or_default();
        let valr_base_url = env::var("VALR_BASE_URL")
            .unwrap_or_else(|_| "https://api.valr.com".to_string());
        let valr_ws_base_url = env::var("VALR_WS_BASE_URL")
            .unwrap_or_else(|_| "wss://api.valr.com".to_string());

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./aether.db".to_string());

        let web_port = env::var("WEB_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("Failed to parse WEB_PORT")?;

        let initial_mode_str = env::var("INITIAL_MODE").unwrap_or_else(|_| "PAPER".to_string());
        let initial_mode = TradingMode::from_str(&initial_mode_str)
            .with_context(|| format!("Invalid INITIAL_MODE: {}", initial_mode_str))?;

        let llm_api_key = env::var("LLM_API_KEY").ok();

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        if matches!(initial_mode, TradingMode::Live)
            && (valr_api_key.is_empty() || valr_api_secret.is_empty())
        {
            anyhow::bail!("INITIAL_MODE=LIVE requires VALR_API_KEY and VALR_API_SECRET to be set");
        }

        Ok(Self {
            valr_api_key,
            valr_api_secret,
            valr_base_url,
            valr_ws_base_url,
            database_url,
            web_port,
            initial_mode,
            llm_api_key,
            log_level,
        })
    }
}
