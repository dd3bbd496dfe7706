use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

use crate::config::RiskSizerSettings;
use crate::database::Store;
use crate::types::{Pair, RejectionStage, Signal3, TradeParameters};

/// Tier 3. Given a predictor's signal and confidence, either sizes a
/// candidate trade or rejects it outright — every call writes exactly
/// one `aether_risk_decisions` row, success or failure, before returning.
pub struct RiskSizer {
    store: Arc<Store>,
}

/// What `size` produced, before the caller persists the decision row.
pub enum SizingOutcome {
    Sized {
        params: TradeParameters,
        decision_id: i64,
    },
    Rejected {
        decision_id: i64,
        reason: String,
    },
}

impl RiskSizer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Sizes `(pair, signal, confidence)` against a volatility forecast
    /// (stop-loss/take-profit pct) and the portfolio's current value,
    /// writing a decision row for every outcome.
    pub async fn size(
        &self,
        pair: Pair,
        signal: Signal3,
        confidence: f64,
        portfolio_value_zar: Decimal,
        volatility_forecast_pct: Decimal,
        settings: &RiskSizerSettings,
    ) -> anyhow::Result<SizingOutcome> {
        if confidence <= settings.min_confidence.to_f64().unwrap_or(0.0) {
            let reason = format!(
                "confidence {:.4} below threshold {}",
                confidence, settings.min_confidence
            );
            debug!(pair = %pair, %reason, "risk sizer rejected candidate");
            let decision_id = self
                .store
                .insert_rejected_decision(
                    pair,
                    signal,
                    confidence,
                    RejectionStage::Tier3RiskSizer,
                    &reason,
                )
                .await?;
            return Ok(SizingOutcome::Rejected { decision_id, reason });
        }

        let stop_loss_pct = volatility_forecast_pct.max(settings.default_stop_loss_pct);
        let take_profit_pct = stop_loss_pct * dec!(2);

        // Fractional-Kelly: edge scales with confidence above the break-even
        // point of 0.5, scaled down by `kelly_fraction` for prudence.
        let confidence_dec = Decimal::try_from(confidence).unwrap_or(Decimal::ZERO);
        let edge = (confidence_dec - dec!(0.5)).max(Decimal::ZERO) * dec!(2);
        let kelly_pct = edge * settings.kelly_fraction;
        let position_fraction = kelly_pct.min(settings.max_position_fraction);

        if position_fraction <= Decimal::ZERO || portfolio_value_zar <= Decimal::ZERO {
            let reason = "no edge after fractional-Kelly sizing".to_string();
            let decision_id = self
                .store
                .insert_rejected_decision(
                    pair,
                    signal,
                    confidence,
                    RejectionStage::Tier3RiskSizer,
                    &reason,
                )
                .await?;
            return Ok(SizingOutcome::Rejected { decision_id, reason });
        }

        let position_size_zar = portfolio_value_zar * position_fraction;
        let leverage = Decimal::ONE;
        let max_loss_zar = position_size_zar * stop_loss_pct / dec!(100);
        let expected_gain_zar = position_size_zar * take_profit_pct / dec!(100);

        let decision_id = self
            .store
            .insert_pending_decision(
                pair,
                signal,
                confidence,
                position_size_zar,
                leverage,
                stop_loss_pct,
                take_profit_pct,
            )
            .await?;

        Ok(SizingOutcome::Sized {
            params: TradeParameters {
                position_size_zar,
                leverage,
                stop_loss_pct,
                take_profit_pct,
                max_loss_zar,
                expected_gain_zar,
            },
            decision_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_fraction_clamped_to_max() {
        let settings = RiskSizerSettings::default();
        let confidence_dec = dec!(0.99);
        let edge = (confidence_dec - dec!(0.5)).max(Decimal::ZERO) * dec!(2);
        let kelly_pct = edge * settings.kelly_fraction;
        let position_fraction = kelly_pct.min(settings.max_position_fraction);
        assert!(position_fraction <= settings.max_position_fraction);
    }
}
