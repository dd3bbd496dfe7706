use chrono::{Datelike, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::indicators::{
    BollingerBands, MoneyFlowIndex, StochasticRSI, ATR, EMA, MACD, OBV, RSI, VWAP,
};
use crate::types::{CandleBuffer, FeatureVector, Pair, Position, TimeFrame, FEATURE_VECTOR_WIDTH};

const TIMEFRAMES: [TimeFrame; 4] = [TimeFrame::M1, TimeFrame::M5, TimeFrame::M15, TimeFrame::H1];
const PER_TIMEFRAME_FEATURES: usize = 15;

/// Builds the 90-wide feature vector the predictor reads from the store.
/// Per-timeframe readings (RSI/MACD/EMA/Bollinger/ATR/volume, 15 each across
/// four timeframes) plus thirty scalar context fields — recent performance,
/// calendar, cross-pair correlation, and reserved slots for context the core
/// does not yet compute (order-book imbalance, spread) but persists room for.
pub struct FeatureEngineer;

impl FeatureEngineer {
    pub fn compute(
        pair: Pair,
        candles_by_timeframe: &HashMap<TimeFrame, CandleBuffer>,
        btc_daily: Option<&CandleBuffer>,
        pair_daily: Option<&CandleBuffer>,
        recent_closed: &[Position],
    ) -> Option<FeatureVector> {
        let mut values = Vec::with_capacity(FEATURE_VECTOR_WIDTH);
        let mut names = Vec::with_capacity(FEATURE_VECTOR_WIDTH);

        for tf in TIMEFRAMES {
            let buffer = candles_by_timeframe.get(&tf)?;
            let (tf_values, tf_names) = timeframe_features(tf, buffer);
            values.extend(tf_values);
            names.extend(tf_names);
        }

        let pct_change_from_daily = |back: usize| -> f64 {
            pair_daily
                .and_then(|b| {
                    let candles = &b.candles;
                    if candles.len() <= back {
                        return None;
                    }
                    let from = candles[candles.len() - 1 - back].close;
                    let to = candles.last()?.close;
                    if from.is_zero() {
                        return None;
                    }
                    ((to - from) / from * Decimal::from(100)).to_f64()
                })
                .unwrap_or(0.0)
        };

        let price_vs_200ema_pct = pair_daily
            .and_then(|b| {
                let closes = b.closes();
                if closes.len() < 2 {
                    return None;
                }
                let mut ema = EMA::new(200.min(closes.len()));
                let mut last = None;
                for c in &closes {
                    last = ema.update(*c).or(last);
                }
                let ema_value = last?;
                let price = *closes.last()?;
                if ema_value.is_zero() {
                    return None;
                }
                ((price - ema_value) / ema_value * Decimal::from(100)).to_f64()
            })
            .unwrap_or(0.0);

        let (recent_win_rate, recent_avg_pnl_pct, streak) = recent_performance(recent_closed);

        let now = Utc::now();
        let hour_of_day = now.hour() as f64 / 24.0;
        let day_of_week = now.weekday().num_days_from_monday() as f64 / 7.0;
        let pair_index = Pair::all().iter().position(|p| *p == pair).unwrap_or(0) as f64
            / Pair::all().len().max(1) as f64;

        let correlation_with_btc = correlation(btc_daily, pair_daily).unwrap_or(0.0);

        let volatility_regime = candles_by_timeframe
            .get(&TimeFrame::H1)
            .and_then(|b| atr_pct(b, 14))
            .map(|pct| {
                if pct < 0.5 {
                    0.0
                } else if pct < 1.0 {
                    1.0
                } else if pct < 2.0 {
                    2.0
                } else {
                    3.0
                }
            })
            .unwrap_or(0.0);

        // Regime classification slots are reserved; no detector feeds them.
        let (regime_bull, regime_bear, regime_neutral, regime_confidence) = (0.0, 0.0, 0.0, 0.0);

        let context: [(f64, &'static str); 30] = [
            (regime_bull, "regime_bull"),
            (regime_bear, "regime_bear"),
            (regime_neutral, "regime_neutral"),
            (regime_confidence, "regime_confidence"),
            (pct_change_from_daily(1), "price_change_24h_pct"),
            (pct_change_from_daily(7), "price_change_7d_pct"),
            (pct_change_from_daily(30), "price_change_30d_pct"),
            (price_vs_200ema_pct, "price_vs_200ema_pct"),
            (recent_win_rate, "recent_win_rate"),
            (recent_avg_pnl_pct, "recent_avg_pnl_pct"),
            (streak, "streak"),
            (hour_of_day, "hour_of_day"),
            (day_of_week, "day_of_week"),
            (pair_index, "pair_index"),
            (correlation_with_btc, "correlation_with_btc"),
            (volatility_regime, "volatility_regime"),
            (0.0, "spread_bps_reserved"),
            (0.0, "orderbook_imbalance_reserved"),
            (recent_closed.len() as f64, "recent_closed_count"),
            (0.0, "reserved_context_1"),
            (0.0, "reserved_context_2"),
            (0.0, "reserved_context_3"),
            (0.0, "reserved_context_4"),
            (0.0, "reserved_context_5"),
            (0.0, "reserved_context_6"),
            (0.0, "reserved_context_7"),
            (0.0, "reserved_context_8"),
            (0.0, "reserved_context_9"),
            (0.0, "reserved_context_10"),
            (0.0, "reserved_context_11"),
        ];
        for (value, name) in context {
            values.push(value);
            names.push(name.to_string());
        }

        let fv = FeatureVector::new(pair, now, values, names);
        if fv.is_well_formed() {
            Some(fv)
        } else {
            None
        }
    }
}

fn timeframe_features(tf: TimeFrame, buffer: &CandleBuffer) -> (Vec<f64>, Vec<String>) {
    let prefix = tf.as_str();
    let closes = buffer.closes();
    let current = buffer.last();

    let mut rsi = RSI::new(14);
    let mut rsi_value = None;
    for c in &closes {
        rsi_value = rsi.update(*c).or(rsi_value);
    }

    let mut macd = MACD::default_params();
    let mut macd_hist = None;
    for c in &closes {
        if let Some(out) = macd.update(*c) {
            macd_hist = Some(out.histogram);
        }
    }

    let mut ema_fast = EMA::new(9);
    let mut ema_slow = EMA::new(21);
    let (mut fast_v, mut slow_v) = (None, None);
    for c in &closes {
        fast_v = ema_fast.update(*c).or(fast_v);
        slow_v = ema_slow.update(*c).or(slow_v);
    }
    let ema_spread_pct = match (fast_v, slow_v) {
        (Some(f), Some(s)) if !s.is_zero() => ((f - s) / s * Decimal::from(100)).to_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    let mut ema50 = EMA::new(50);
    let mut ema50_v = None;
    for c in &closes {
        ema50_v = ema50.update(*c).or(ema50_v);
    }
    let price_vs_ema50_pct = match (ema50_v, current) {
        (Some(e), Some(cur)) if !e.is_zero() => {
            ((cur.close - e) / e * Decimal::from(100)).to_f64().unwrap_or(0.0)
        }
        _ => 0.0,
    };

    let mut bb = BollingerBands::default_params();
    let (mut bb_pct_b, mut bb_bandwidth) = (0.5, 0.0);
    for c in &closes {
        if let Some(out) = bb.update(*c) {
            bb_pct_b = out.percent_b.to_f64().unwrap_or(0.5);
            bb_bandwidth = out.bandwidth.to_f64().unwrap_or(0.0);
        }
    }

    let mut atr = ATR::new(14);
    let mut atr_value = None;
    for c in &buffer.candles {
        atr_value = atr.update(c.high, c.low, c.close).or(atr_value);
    }
    let atr_pct_value = match (atr_value, current) {
        (Some(a), Some(cur)) if !cur.close.is_zero() => {
            (a / cur.close * Decimal::from(100)).to_f64().unwrap_or(0.0)
        }
        _ => 0.0,
    };

    let mut volume_profile = crate::indicators::VolumeProfile::new(20);
    let mut volume_ratio = 1.0;
    for c in &buffer.candles {
        if volume_profile.update(c.volume).is_some() {
            if let Some(cur) = current {
                volume_ratio = volume_profile
                    .relative_volume(cur.volume)
                    .unwrap_or(Decimal::ONE)
                    .to_f64()
                    .unwrap_or(1.0);
            }
        }
    }

    let mut obv = OBV::new();
    let mut obv_values = Vec::new();
    for c in &buffer.candles {
        obv_values.push(obv.update(c.close, c.volume));
    }
    let obv_trend = if obv_values.len() >= 2 {
        let last = obv_values[obv_values.len() - 1];
        let prev = obv_values[obv_values.len() - 2];
        if last > prev {
            1.0
        } else if last < prev {
            -1.0
        } else {
            0.0
        }
    } else {
        0.0
    };

    let mut vwap = VWAP::new();
    let mut vwap_diff_pct = 0.0;
    for c in &buffer.candles {
        if let Some(v) = vwap.update(c.high, c.low, c.close, c.volume) {
            if !v.is_zero() {
                vwap_diff_pct = ((c.close - v) / v * Decimal::from(100)).to_f64().unwrap_or(0.0);
            }
        }
    }

    let mut mfi = MoneyFlowIndex::new(14);
    let mut mfi_value = 50.0;
    for c in &buffer.candles {
        if let Some(v) = mfi.update(c.high, c.low, c.close, c.volume) {
            mfi_value = v.to_f64().unwrap_or(50.0);
        }
    }

    let mut stoch_rsi = StochasticRSI::new(14, 14, 3, 3);
    let mut stoch_k = 50.0;
    for c in &closes {
        if let Some((k, _d)) = stoch_rsi.update(*c) {
            stoch_k = k.to_f64().unwrap_or(50.0);
        }
    }

    let (body_size_pct, range_pct, is_bullish) = match current {
        Some(cur) if !cur.open.is_zero() && !cur.close.is_zero() => (
            (cur.body_size() / cur.open * Decimal::from(100)).to_f64().unwrap_or(0.0),
            (cur.range() / cur.close * Decimal::from(100)).to_f64().unwrap_or(0.0),
            if cur.is_bullish() { 1.0 } else { 0.0 },
        ),
        _ => (0.0, 0.0, 0.0),
    };

    let values = vec![
        rsi_value.and_then(|v| v.to_f64()).unwrap_or(50.0),
        macd_hist.and_then(|v| v.to_f64()).unwrap_or(0.0),
        ema_spread_pct,
        price_vs_ema50_pct,
        bb_pct_b,
        bb_bandwidth,
        atr_pct_value,
        volume_ratio,
        obv_trend,
        vwap_diff_pct,
        mfi_value / 100.0,
        stoch_k / 100.0,
        body_size_pct,
        range_pct,
        is_bullish,
    ];
    debug_assert_eq!(values.len(), PER_TIMEFRAME_FEATURES);

    let names = vec![
        format!("{prefix}_rsi_14"),
        format!("{prefix}_macd_histogram"),
        format!("{prefix}_ema_9_21_spread_pct"),
        format!("{prefix}_price_vs_ema50_pct"),
        format!("{prefix}_bb_percent_b"),
        format!("{prefix}_bb_bandwidth_pct"),
        format!("{prefix}_atr_pct"),
        format!("{prefix}_volume_ratio"),
        format!("{prefix}_obv_trend"),
        format!("{prefix}_vwap_diff_pct"),
        format!("{prefix}_mfi"),
        format!("{prefix}_stoch_rsi_k"),
        format!("{prefix}_body_size_pct"),
        format!("{prefix}_range_pct"),
        format!("{prefix}_is_bullish"),
    ];

    (values, names)
}

fn atr_pct(buffer: &CandleBuffer, period: usize) -> Option<f64> {
    let mut atr = ATR::new(period);
    let mut value = None;
    for c in &buffer.candles {
        value = atr.update(c.high, c.low, c.close).or(value);
    }
    let current = buffer.last()?;
    if current.close.is_zero() {
        return None;
    }
    (value? / current.close * Decimal::from(100)).to_f64()
}

fn recent_performance(recent_closed: &[Position]) -> (f64, f64, f64) {
    if recent_closed.is_empty() {
        return (0.5, 0.0, 0.0);
    }
    let n = recent_closed.len() as f64;
    let wins = recent_closed
        .iter()
        .filter(|p| p.pnl_zar.map(|v| v > Decimal::ZERO).unwrap_or(false))
        .count() as f64;
    let win_rate = wins / n;
    let avg_pnl = recent_closed
        .iter()
        .filter_map(|p| p.pnl_pct)
        .filter_map(|v| v.to_f64())
        .sum::<f64>()
        / n;

    let mut streak = 0.0f64;
    // `recent_closed` is newest-first; walking it in that order builds the
    // streak currently in effect at the head of the series.
    for position in recent_closed {
        let is_win = position.pnl_zar.map(|v| v > Decimal::ZERO).unwrap_or(false);
        if is_win {
            if streak >= 0.0 {
                streak += 1.0;
            } else {
                break;
            }
        } else if streak <= 0.0 {
            streak -= 1.0;
        } else {
            break;
        }
    }

    (win_rate, avg_pnl, streak)
}

fn correlation(a: Option<&CandleBuffer>, b: Option<&CandleBuffer>) -> Option<f64> {
    let a = a?;
    let b = b?;
    let returns_a = daily_returns(a);
    let returns_b = daily_returns(b);
    let n = returns_a.len().min(returns_b.len());
    if n < 5 {
        return None;
    }
    let (ra, rb) = (&returns_a[..n], &returns_b[..n]);
    let mean_a = ra.iter().sum::<f64>() / n as f64;
    let mean_b = rb.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ra.iter().zip(rb.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        None
    } else {
        Some(cov / denom)
    }
}

fn daily_returns(buffer: &CandleBuffer) -> Vec<f64> {
    buffer
        .candles
        .windows(2)
        .filter(|w| !w[0].close.is_zero())
        .filter_map(|w| ((w[1].close - w[0].close) / w[0].close * Decimal::from(100)).to_f64())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;
    use chrono::Duration;

    fn sample_buffer(n: usize) -> CandleBuffer {
        let mut buf = CandleBuffer::new(200);
        let base = Utc::now() - Duration::days(n as i64);
        for i in 0..n {
            let price = Decimal::from(100 + i as i64);
            buf.push(Candle {
                pair: Pair::BTCZAR,
                timeframe: TimeFrame::M1,
                open_time: base + Duration::minutes(i as i64),
                close_time: base + Duration::minutes(i as i64 + 1),
                open: price,
                high: price + Decimal::ONE,
                low: price - Decimal::ONE,
                close: price,
                volume: Decimal::from(10),
                num_trades: 5,
            });
        }
        buf
    }

    #[test]
    fn compute_produces_well_formed_vector() {
        let mut map = HashMap::new();
        for tf in TIMEFRAMES {
            map.insert(tf, sample_buffer(25));
        }
        let fv = FeatureEngineer::compute(Pair::BTCZAR, &map, None, None, &[]).unwrap();
        assert!(fv.is_well_formed());
        assert_eq!(fv.values.len(), FEATURE_VECTOR_WIDTH);
    }

    #[test]
    fn missing_timeframe_yields_none() {
        let mut map = HashMap::new();
        map.insert(TimeFrame::M1, sample_buffer(25));
        assert!(FeatureEngineer::compute(Pair::BTCZAR, &map, None, None, &[]).is_none());
    }
}
