use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::StrategicGateSettings;
use crate::database::Store;
use crate::types::{Pair, Signal3, TimeFrame, TradeParameters};

const LLM_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Tier 4, active only when `StrategicGateSettings.enabled`. Gathers a
/// market-context snapshot, asks an external LLM for a structured verdict,
/// and never lets a timeout, transport error, or unparseable response
/// slip through as an approval.
pub struct StrategicGate {
    http: reqwest::Client,
    store: Arc<Store>,
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum GateVerdict {
    Approve,
    Reject {
        reason: String,
    },
    Modify {
        multiplier: Decimal,
        leverage_override: Option<Decimal>,
        stop_loss_pct_override: Option<Decimal>,
        take_profit_pct_override: Option<Decimal>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct MarketContext {
    pair: Pair,
    signal: Signal3,
    confidence: f64,
    params: ContextParams,
    price_change_24h_pct: Option<f64>,
    price_change_7d_pct: Option<f64>,
    price_change_30d_pct: Option<f64>,
    volatility_regime: &'static str,
    open_position_count: usize,
    portfolio_total_value_zar: String,
    portfolio_drawdown_pct: String,
}

#[derive(Debug, Clone, Serialize)]
struct ContextParams {
    position_size_zar: String,
    leverage: String,
    stop_loss_pct: String,
    take_profit_pct: String,
}

#[derive(Debug, Deserialize)]
struct LlmVerdictBody {
    verdict: String,
    reasoning: String,
    #[serde(default)]
    multiplier: Option<f64>,
    #[serde(default)]
    leverage: Option<f64>,
    #[serde(default)]
    stop_loss_pct: Option<f64>,
    #[serde(default)]
    take_profit_pct: Option<f64>,
}

impl StrategicGate {
    pub fn new(store: Arc<Store>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            api_key,
        }
    }

    pub async fn evaluate(
        &self,
        pair: Pair,
        signal: Signal3,
        confidence: f64,
        params: &TradeParameters,
        settings: &StrategicGateSettings,
    ) -> anyhow::Result<GateVerdict> {
        let context = self.gather_context(pair, signal, confidence, params).await?;

        let Some(api_key) = self.api_key.as_deref() else {
            warn!("strategic gate enabled but no LLM API key configured");
            return Ok(GateVerdict::Reject {
                reason: "LLM_API_ERROR: no credentials configured".to_string(),
            });
        };

        let request = self
            .http
            .post(LLM_ENDPOINT)
            .timeout(Duration::from_secs(settings.llm_timeout_secs))
            .header("x-api-key", api_key)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": settings.model,
                "max_tokens": 512,
                "messages": [{"role": "user", "content": prompt_for(&context)}],
            }))
            .send()
            .await;

        let response = match request {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "strategic gate LLM request failed");
                return Ok(GateVerdict::Reject {
                    reason: "LLM_API_ERROR".to_string(),
                });
            }
        };

        if !response.status().is_success() {
            error!(status = %response.status(), "strategic gate LLM returned non-success");
            return Ok(GateVerdict::Reject {
                reason: "LLM_API_ERROR".to_string(),
            });
        }

        let body: LlmVerdictBody = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "strategic gate LLM response failed to parse");
                return Ok(GateVerdict::Reject {
                    reason: "LLM_PARSE_ERROR".to_string(),
                });
            }
        };

        Ok(match body.verdict.to_uppercase().as_str() {
            "APPROVE" => GateVerdict::Approve,
            "REJECT" => GateVerdict::Reject {
                reason: body.reasoning,
            },
            "MODIFY" => GateVerdict::Modify {
                multiplier: body
                    .multiplier
                    .and_then(|m| Decimal::try_from(m).ok())
                    .unwrap_or(Decimal::ONE)
                    .clamp(Decimal::ZERO, dec!(2)),
                leverage_override: body.leverage.and_then(|v| Decimal::try_from(v).ok()),
                stop_loss_pct_override: body.stop_loss_pct.and_then(|v| Decimal::try_from(v).ok()),
                take_profit_pct_override: body
                    .take_profit_pct
                    .and_then(|v| Decimal::try_from(v).ok()),
            },
            other => {
                warn!(verdict = other, "strategic gate received unrecognized verdict");
                GateVerdict::Reject {
                    reason: "LLM_PARSE_ERROR".to_string(),
                }
            }
        })
    }

    async fn gather_context(
        &self,
        pair: Pair,
        signal: Signal3,
        confidence: f64,
        params: &TradeParameters,
    ) -> anyhow::Result<MarketContext> {
        let daily = self.store.get_recent_candles(pair, TimeFrame::D1, 31).await?;
        let pct_change = |back: usize| -> Option<f64> {
            if daily.len() <= back {
                return None;
            }
            let from = daily[daily.len() - 1 - back].close;
            let to = daily.last()?.close;
            if from.is_zero() {
                return None;
            }
            ((to - from) / from * Decimal::from(100)).to_f64()
        };

        let portfolio = self.store.get_portfolio_state().await?;
        let open_positions = self.store.get_open_positions().await?;

        Ok(MarketContext {
            pair,
            signal,
            confidence,
            params: ContextParams {
                position_size_zar: params.position_size_zar.to_string(),
                leverage: params.leverage.to_string(),
                stop_loss_pct: params.stop_loss_pct.to_string(),
                take_profit_pct: params.take_profit_pct.to_string(),
            },
            price_change_24h_pct: pct_change(1),
            price_change_7d_pct: pct_change(7),
            price_change_30d_pct: pct_change(30),
            volatility_regime: "unclassified",
            open_position_count: open_positions.len(),
            portfolio_total_value_zar: portfolio
                .as_ref()
                .map(|p| p.total_value_zar.to_string())
                .unwrap_or_else(|| "0".to_string()),
            portfolio_drawdown_pct: portfolio
                .as_ref()
                .map(|p| p.current_drawdown_pct.to_string())
                .unwrap_or_else(|| "0".to_string()),
        })
    }
}

fn prompt_for(context: &MarketContext) -> String {
    format!(
        "Evaluate this candidate trade and respond with a JSON object {{verdict, reasoning, multiplier?, leverage?, stop_loss_pct?, take_profit_pct?}} where verdict is one of APPROVE, REJECT, MODIFY.\n\nContext: {}",
        serde_json::to_string(context).unwrap_or_default()
    )
}
