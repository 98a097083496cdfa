use super::ema::ema_last;
use crate::market_data::Bar;

/// True range per bar; the first bar falls back to high - low
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let hl = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => hl
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => hl,
            }
        })
        .collect()
}

/// ATR-style volatility as a percent of the last close:
/// `100 * EMA(true_range, fast_span) / last_close`
pub fn atr_volatility_pct(bars: &[Bar], fast_span: usize) -> Option<f64> {
    if bars.len() < 2 {
        return None;
    }
    let last_close = bars.last()?.close;
    if last_close <= 0.0 {
        return None;
    }
    let atr = ema_last(&true_range(bars), fast_span)?;
    Some(100.0 * atr / last_close)
}

/// Display-only scaling of a volatility percent
pub fn scaled_volatility(volatility_pct: f64, scale: f64) -> f64 {
    volatility_pct * scale
}

/// Liquidity ratio `100 * EMA(volume, fast) / EMA(volume, slow)`, clamped to
/// [0, 200]. Above 100 means recent volume outpaces the baseline.
pub fn liquidity_pct(volumes: &[f64], fast_span: usize, slow_span: usize) -> Option<f64> {
    if volumes.is_empty() || volumes.len() < slow_span {
        return None;
    }
    let fast = ema_last(volumes, fast_span)?;
    let slow = ema_last(volumes, slow_span)?;
    if slow <= 0.0 {
        return None;
    }
    Some((100.0 * fast / slow).clamp(0.0, 200.0))
}
