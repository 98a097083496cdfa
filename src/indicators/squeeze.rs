//! Squeeze / PSI tightness score
//!
//! A running price envelope decays toward each close at rate `1/conv`. The log
//! of the envelope width, correlated against bar index over the last `length`
//! bars, tells whether the range is widening (low score) or holding/narrowing
//! (high score, "coiled").

use crate::stats::index_correlation;
use log::debug;

/// Tightness score in 0..=100, `None` with fewer than `length + 2` closes or a
/// degenerate (zero-width) envelope inside the window.
pub fn squeeze_psi(closes: &[f64], conv: f64, length: usize) -> Option<f64> {
    if length < 2 || conv <= 0.0 || closes.len() < length + 2 {
        return None;
    }

    let mut upper = closes[0];
    let mut lower = closes[0];
    let mut diffs = Vec::with_capacity(closes.len());

    for &close in closes {
        upper = (upper - (upper - close) / conv).max(close);
        lower = (lower + (close - lower) / conv).min(close);
        diffs.push((upper - lower).ln());
    }

    let window = &diffs[diffs.len() - length..];
    if window.iter().any(|d| !d.is_finite()) {
        debug!("PSI window contains a zero-width envelope, treating as unknown");
        return None;
    }

    let r = index_correlation(window).ok()?;
    Some((-50.0 * r + 50.0).clamp(0.0, 100.0))
}
