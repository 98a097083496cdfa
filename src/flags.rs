use crate::market_data::Bar;
use serde::{Deserialize, Serialize};

/// Per-symbol booleans for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFlags {
    pub new_high: bool,
    pub new_low: bool,
    pub up_streak: bool,
    pub down_streak: bool,
}

impl SymbolFlags {
    /// Flags from a completed bar series.
    ///
    /// New high/low compare the last bar against the prior `lookback` bars;
    /// streaks need `streak_len` strictly rising/falling closes. Short history
    /// leaves the affected flags false.
    pub fn from_bars(bars: &[Bar], lookback: usize, streak_len: usize) -> Self {
        let mut flags = SymbolFlags::default();
        let Some(last) = bars.last() else {
            return flags;
        };

        if lookback > 0 && bars.len() > lookback {
            let prior = &bars[bars.len() - 1 - lookback..bars.len() - 1];
            let prior_high = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let prior_low = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            flags.new_high = last.high > prior_high;
            flags.new_low = last.low < prior_low;
        }

        if streak_len >= 2 && bars.len() >= streak_len {
            let tail = &bars[bars.len() - streak_len..];
            flags.up_streak = tail.windows(2).all(|w| w[1].close > w[0].close);
            flags.down_streak = tail.windows(2).all(|w| w[1].close < w[0].close);
        }

        flags
    }

    pub fn counts(&self) -> FlagCounts {
        FlagCounts {
            nh: self.new_high as u32,
            nl: self.new_low as u32,
            up: self.up_streak as u32,
            down: self.down_streak as u32,
        }
    }
}

/// Summed flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCounts {
    pub nh: u32,
    pub nl: u32,
    pub up: u32,
    pub down: u32,
}

impl FlagCounts {
    pub fn add(&mut self, other: FlagCounts) {
        self.nh += other.nh;
        self.nl += other.nl;
        self.up += other.up;
        self.down += other.down;
    }
}

impl From<SymbolFlags> for FlagCounts {
    fn from(flags: SymbolFlags) -> Self {
        flags.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from(hlc: &[(f64, f64, f64)]) -> Vec<Bar> {
        hlc.iter()
            .enumerate()
            .map(|(i, &(h, l, c))| Bar::new(i as i64 * 600, c, h, l, c, 10.0))
            .collect()
    }

    #[test]
    fn test_new_high_and_up_streak() {
        let bars = bars_from(&[(10.0, 9.0, 9.5), (10.5, 9.5, 10.0), (11.0, 10.0, 10.8)]);
        let flags = SymbolFlags::from_bars(&bars, 2, 3);
        assert!(flags.new_high);
        assert!(!flags.new_low);
        assert!(flags.up_streak);
        assert!(!flags.down_streak);
    }

    #[test]
    fn test_new_low_and_down_streak() {
        let bars = bars_from(&[(10.0, 9.0, 9.8), (9.9, 8.9, 9.2), (9.5, 8.5, 8.7)]);
        let flags = SymbolFlags::from_bars(&bars, 2, 3);
        assert!(flags.new_low);
        assert!(flags.down_streak);
        assert!(!flags.new_high);
    }

    #[test]
    fn test_equal_closes_break_streak() {
        let bars = bars_from(&[(10.0, 9.0, 9.5), (10.0, 9.0, 9.5), (10.0, 9.0, 9.6)]);
        let flags = SymbolFlags::from_bars(&bars, 2, 3);
        assert!(!flags.up_streak);
        assert!(!flags.new_high);
    }

    #[test]
    fn test_insufficient_history_is_all_false() {
        let bars = bars_from(&[(10.0, 9.0, 9.5), (12.0, 8.0, 11.0)]);
        assert_eq!(SymbolFlags::from_bars(&bars, 20, 3), SymbolFlags::default());
        assert_eq!(SymbolFlags::from_bars(&[], 20, 3), SymbolFlags::default());
    }
}
