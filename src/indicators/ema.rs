//! Exponential moving averages and the EMA-distance posture score

use serde::{Deserialize, Serialize};

/// Exponential moving average series.
///
/// Seeded with the first value, smoothing `k = 2 / (span + 1)`. The output has
/// the same length as the input; an empty input yields an empty series.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return result;
    };

    let k = 2.0 / (span.max(1) as f64 + 1.0);
    let mut prev = first;
    result.push(prev);

    for &value in &values[1..] {
        prev = value * k + prev * (1.0 - k);
        result.push(prev);
    }

    result
}

/// Last value of the EMA series, `None` for empty input
pub fn ema_last(values: &[f64], span: usize) -> Option<f64> {
    ema(values, span).last().copied()
}

/// Where price sits relative to its EMA
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posture {
    /// 100 * (close - ema) / ema
    pub dist_pct: f64,
    /// dist_pct / saturation, clamped to [-1, 1]
    pub unit: f64,
    /// 50 + 50 * unit, so 0..100 with 50 neutral
    pub score: f64,
}

/// EMA-distance posture score.
///
/// `saturation_pct` is the distance (in percent) at which the score pins to 0
/// or 100. Returns `None` for a non-positive EMA or saturation.
pub fn ema_posture(close: f64, ema: f64, saturation_pct: f64) -> Option<Posture> {
    if ema <= 0.0 || saturation_pct <= 0.0 || !close.is_finite() || !ema.is_finite() {
        return None;
    }

    let dist_pct = 100.0 * (close - ema) / ema;
    let unit = (dist_pct / saturation_pct).clamp(-1.0, 1.0);

    Some(Posture {
        dist_pct,
        unit,
        score: 50.0 + 50.0 * unit,
    })
}

/// +1 above the EMA, -1 below, 0 on it
pub fn ema_sign(close: f64, ema: f64) -> i8 {
    if close > ema {
        1
    } else if close < ema {
        -1
    } else {
        0
    }
}
