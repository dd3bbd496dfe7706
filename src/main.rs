mod config;
mod database;
mod engine;
mod exchange;
mod indicators;
mod ml;
mod notifications;
mod risk;
mod types;
mod web;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{EngineConfig, RuntimeConfig, RuntimeConfigManager};
use database::Store;
use engine::{Engine, ModeOrchestrator};
use types::{Pair, TradingMode};
use web::{start_control_server, AppState};

#[derive(Parser)]
#[command(name = "aether")]
#[command(author = "Aether")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous cryptocurrency trading core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug-level logging regardless of LOG_LEVEL
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server; the engine lifecycle is driven over HTTP
    Serve,
    /// Start the engine immediately and also serve the control surface
    Run {
        /// Trading pairs to monitor (defaults to all)
        #[arg(short, long)]
        pairs: Vec<String>,
        /// Enable auto-trading at boot
        #[arg(long)]
        auto_trading: bool,
    },
    /// Print the current trading mode and exit
    ModeStatus,
    /// Switch the trading mode
    ModeSet {
        /// PAPER or LIVE
        mode: String,
        /// Required to switch to LIVE
        #[arg(long)]
        confirmed: bool,
        /// Reason recorded in the mode history
        #[arg(short, long, default_value = "operator request")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("aether trading core starting");

    let store = Arc::new(Store::new(&config.database_url).await?);
    let runtime_config = Arc::new(RuntimeConfigManager::new(RuntimeConfig::default()));

    match cli.command {
        Commands::Serve => {
            let state = AppState::new(Arc::new(config.clone()), store, runtime_config);
            start_control_server(state, config.web_port).await?;
        }
        Commands::Run { pairs, auto_trading } => {
            let pairs = parse_pairs(&pairs)?;
            let engine = Arc::new(
                Engine::new(&config, store.clone(), runtime_config.clone(), pairs, auto_trading).await?,
            );
            engine.start().await?;
            info!(port = config.web_port, "engine started, control surface listening");

            let state = AppState::new(Arc::new(config.clone()), store, runtime_config);
            *state.engine.write().await = Some(engine.clone());

            tokio::select! {
                result = start_control_server(state, config.web_port) => { result?; }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    engine.shutdown();
                }
            }
        }
        Commands::ModeStatus => {
            let orchestrator = ModeOrchestrator::new(store);
            let state = orchestrator.get_mode_state().await?;
            println!("current mode: {}", state.current_mode);
            println!("changed by:   {}", state.changed_by);
            println!("reason:       {}", state.reason);
            println!("changed at:   {}", state.last_changed_at);
        }
        Commands::ModeSet { mode, confirmed, reason } => {
            let Some(mode) = TradingMode::from_str(&mode) else {
                anyhow::bail!("invalid mode: {mode}, expected PAPER or LIVE");
            };
            let orchestrator = ModeOrchestrator::new(store);
            let outcome = orchestrator.set_mode(mode, confirmed, reason).await?;
            if outcome.changed {
                info!(mode = %outcome.state.current_mode, "trading mode changed");
            } else {
                warn!(mode = %outcome.state.current_mode, "already in requested mode, no change made");
            }
        }
    }

    Ok(())
}

fn parse_pairs(raw: &[String]) -> Result<Vec<Pair>> {
    if raw.is_empty() {
        return Ok(Pair::all());
    }
    raw.iter()
        .map(|p| Pair::from_str(p).ok_or_else(|| anyhow::anyhow!("invalid pair: {p}")))
        .collect()
}
