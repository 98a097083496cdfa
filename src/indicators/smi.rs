use super::ema::ema;

/// Stochastic Momentum Index and its signal line, aligned bar for bar with
/// the input series
#[derive(Debug, Clone, PartialEq)]
pub struct SmiSeries {
    pub smi: Vec<f64>,
    pub signal: Vec<f64>,
}

impl SmiSeries {
    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.smi.last()?, *self.signal.last()?))
    }
}

/// SMI over a `length_k` high/low window, double EMA(`length_d`) smoothing and
/// an EMA(`length_ema`) signal line.
///
/// Needs at least `max(length_k, length_d, length_ema) + 5` bars.
pub fn smi(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    length_k: usize,
    length_d: usize,
    length_ema: usize,
) -> Option<SmiSeries> {
    let n = closes.len();
    let required = length_k.max(length_d).max(length_ema) + 5;
    if n < required || highs.len() != n || lows.len() != n || length_k == 0 {
        return None;
    }

    let mut relative = Vec::with_capacity(n);
    let mut range = Vec::with_capacity(n);

    for i in 0..n {
        let start = (i + 1).saturating_sub(length_k);
        let hh = highs[start..=i].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ll = lows[start..=i].iter().copied().fold(f64::INFINITY, f64::min);
        relative.push(closes[i] - (hh + ll) / 2.0);
        range.push(hh - ll);
    }

    let smooth_relative = ema(&ema(&relative, length_d), length_d);
    let smooth_range = ema(&ema(&range, length_d), length_d);

    let smi: Vec<f64> = smooth_relative
        .iter()
        .zip(&smooth_range)
        .map(|(rel, rng)| if *rng != 0.0 { 200.0 * rel / rng } else { 0.0 })
        .collect();
    let signal = ema(&smi, length_ema);

    Some(SmiSeries { smi, signal })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smi_requires_history() {
        let v = vec![1.0; 16];
        assert!(smi(&v, &v, &v, 12, 7, 5).is_none());
        let v = vec![1.0; 17];
        assert!(smi(&v, &v, &v, 12, 7, 5).is_some());
    }

    #[test]
    fn test_smi_flat_range_is_zero() {
        let v = vec![5.0; 30];
        let series = smi(&v, &v, &v, 12, 7, 5).unwrap();
        assert!(series.smi.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_smi_rising_market_is_positive_and_bounded() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.5).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.5).collect();

        let (smi_last, signal_last) = smi(&highs, &lows, &closes, 12, 7, 5).unwrap().last().unwrap();
        assert!(smi_last > 0.0);
        assert!(smi_last <= 100.0);
        assert!(signal_last > 0.0);
    }
}
