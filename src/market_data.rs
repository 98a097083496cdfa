use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV sample for a symbol at a timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket-aligned epoch seconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: volume.max(0.0),
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// Dashboard timeframes, one artifact per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "10m")]
    Minutes10,
    #[serde(rename = "30m")]
    Minutes30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hours4,
    #[serde(rename = "1d")]
    Daily,
}

impl TimeFrame {
    pub fn all() -> [TimeFrame; 5] {
        [
            TimeFrame::Minutes10,
            TimeFrame::Minutes30,
            TimeFrame::Hour1,
            TimeFrame::Hours4,
            TimeFrame::Daily,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeFrame::Minutes10 => "10m",
            TimeFrame::Minutes30 => "30m",
            TimeFrame::Hour1 => "1h",
            TimeFrame::Hours4 => "4h",
            TimeFrame::Daily => "1d",
        }
    }

    /// Width of one bar bucket in seconds
    pub fn bucket_seconds(&self) -> i64 {
        match self {
            TimeFrame::Minutes10 => 600,
            TimeFrame::Minutes30 => 1_800,
            TimeFrame::Hour1 => 3_600,
            TimeFrame::Hours4 => 14_400,
            TimeFrame::Daily => 86_400,
        }
    }

    /// Provider aggregation granularity as (multiplier, timespan)
    pub fn granularity(&self) -> (u32, &'static str) {
        match self {
            TimeFrame::Minutes10 => (10, "minute"),
            TimeFrame::Minutes30 => (30, "minute"),
            TimeFrame::Hour1 => (1, "hour"),
            TimeFrame::Hours4 => (4, "hour"),
            TimeFrame::Daily => (1, "day"),
        }
    }

    /// Regular-session bars per trading day (6.5h session)
    pub fn bars_per_session(&self) -> f64 {
        match self {
            TimeFrame::Daily => 1.0,
            _ => 390.0 / (self.bucket_seconds() as f64 / 60.0),
        }
    }

    /// Display-only multiplier normalising volatility across timeframes.
    /// Never feed this into the composite score.
    pub fn volatility_display_scale(&self) -> f64 {
        match self {
            TimeFrame::Minutes10 => 6.25,
            TimeFrame::Daily => 1.0,
            _ => self.bars_per_session().sqrt(),
        }
    }

    /// Calendar days to request so that `lookback_bars` completed bars are
    /// covered, allowing for weekends and holidays
    pub fn calendar_days_for(&self, lookback_bars: usize) -> i64 {
        let trading_days = (lookback_bars as f64 / self.bars_per_session()).ceil() as i64;
        trading_days * 7 / 5 + 5
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "10m" | "10min" => Ok(TimeFrame::Minutes10),
            "30m" | "30min" => Ok(TimeFrame::Minutes30),
            "1h" | "60m" | "hourly" => Ok(TimeFrame::Hour1),
            "4h" | "240m" => Ok(TimeFrame::Hours4),
            "1d" | "d" | "daily" | "eod" => Ok(TimeFrame::Daily),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// Sort ascending, collapse duplicate buckets (last one wins) and drop the
/// trailing bar if it sits in the bucket that contains `now`.
pub fn finalize_series(mut bars: Vec<Bar>, timeframe: TimeFrame, now: DateTime<Utc>) -> Vec<Bar> {
    let bucket = timeframe.bucket_seconds();

    bars.sort_by_key(|b| b.time);

    let mut series: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match series.last_mut() {
            Some(prev) if prev.time.div_euclid(bucket) == bar.time.div_euclid(bucket) => *prev = bar,
            _ => series.push(bar),
        }
    }

    drop_in_flight(&mut series, bucket, now);
    series
}

/// Remove the last bar when it belongs to the current, not-yet-closed bucket
pub fn drop_in_flight(series: &mut Vec<Bar>, bucket_seconds: i64, now: DateTime<Utc>) -> bool {
    let current_bucket = now.timestamp().div_euclid(bucket_seconds);
    match series.last() {
        Some(last) if last.time.div_euclid(bucket_seconds) >= current_bucket => {
            series.pop();
            true
        }
        _ => false,
    }
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

pub fn volumes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.volume).collect()
}
