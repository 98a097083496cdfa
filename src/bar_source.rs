//! Bar Source Adapter
//!
//! Fetches OHLCV aggregates over HTTP, retrying transient failures with
//! bounded exponential backoff. Every series handed to the rest of the
//! pipeline has been sorted, de-duplicated and stripped of the in-flight bar.

use crate::error::DashboardError;
use crate::market_data::{Bar, TimeFrame, finalize_series};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transient failure fetching {symbol}: {message}")]
    Transient {
        symbol: String,
        status: Option<u16>,
        message: String,
    },

    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("HTTP {status} fetching {symbol}: {message}")]
    Http {
        symbol: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode bars for {symbol}: {message}")]
    Decode { symbol: String, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Fatal to the whole run, not just one symbol
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Auth { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Auth,
    Other,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Auth,
        429 | 500 | 502 | 503 | 504 => StatusClass::Transient,
        _ => StatusClass::Other,
    }
}

/// Exponential backoff: `base * factor^(attempt-1)`, capped at `max_delay_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    400
}
fn default_factor() -> f64 {
    1.8
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = (self.base_delay_ms as f64 * self.factor.max(1.0).powi(exp)).min(self.max_delay_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the attempt budget
/// is spent. `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:.1}s",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Source of completed OHLCV bars
pub trait BarSource: Send + Sync {
    /// Raw bars as returned by the provider, in any order
    fn fetch_raw(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        lookback_bars: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Bar>, FetchError>> + Send;

    /// Completed bars only: ascending, one per bucket, without the bar still
    /// forming at `now`, trimmed to the last `lookback_bars`
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        lookback_bars: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Bar>, FetchError>> + Send {
        async move {
            let raw = self.fetch_raw(symbol, timeframe, lookback_bars, now).await?;
            let mut series = finalize_series(raw, timeframe, now);
            if series.len() > lookback_bars {
                series.drain(..series.len() - lookback_bars);
            }
            Ok(series)
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Bucket start, epoch milliseconds
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

/// Parse an aggregates payload: `{"results": [{"t": ms, "o", "h", "l", "c", "v"}]}`.
/// A missing `results` array is an empty series.
pub fn parse_aggs(symbol: &str, body: &str) -> Result<Vec<Bar>, FetchError> {
    let response: AggsResponse = serde_json::from_str(body).map_err(|e| FetchError::Decode {
        symbol: symbol.to_string(),
        message: e.to_string(),
    })?;

    Ok(response
        .results
        .into_iter()
        .filter(|r| r.c.is_finite() && r.h.is_finite() && r.l.is_finite())
        .map(|r| Bar::new(r.t.div_euclid(1000), r.o, r.h, r.l, r.c, r.v))
        .collect())
}

/// HTTP client for a Polygon-style aggregates endpoint
pub struct PolygonClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    page_limit: u32,
    retry: RetryPolicy,
}

impl PolygonClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
        page_limit: u32,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DashboardError::MalformedConfig(format!(
                "Invalid base_url: must start with http:// or https://, got: '{}'",
                base_url
            ))
            .into());
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            page_limit,
            retry,
        })
    }

    /// Aggregates URL without credentials
    pub fn aggs_url(&self, symbol: &str, timeframe: TimeFrame, lookback_bars: usize, now: DateTime<Utc>) -> String {
        let (multiplier, timespan) = timeframe.granularity();
        let to = now.date_naive();
        let from = to - ChronoDuration::days(timeframe.calendar_days_for(lookback_bars));
        format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        )
    }

    async fn get_once(&self, symbol: &str, url: &str) -> Result<Vec<Bar>, FetchError> {
        let limit = self.page_limit.to_string();
        let response = self
            .client
            .get(url)
            .query(&[
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", limit.as_str()),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                symbol: symbol.to_string(),
                status: None,
                message: e.without_url().to_string(),
            })?;

        let status = response.status().as_u16();
        match classify_status(status) {
            StatusClass::Success => {}
            StatusClass::Auth => return Err(FetchError::Auth { status }),
            StatusClass::Transient => {
                return Err(FetchError::Transient {
                    symbol: symbol.to_string(),
                    status: Some(status),
                    message: format!("HTTP {}", status),
                });
            }
            StatusClass::Other => {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    symbol: symbol.to_string(),
                    status,
                    message: body.chars().take(200).collect(),
                });
            }
        }

        let body = response.text().await.map_err(|e| FetchError::Transient {
            symbol: symbol.to_string(),
            status: Some(status),
            message: format!("failed to read body: {}", e.without_url()),
        })?;

        parse_aggs(symbol, &body)
    }
}

impl BarSource for PolygonClient {
    async fn fetch_raw(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        lookback_bars: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bar>, FetchError> {
        let url = self.aggs_url(symbol, timeframe, lookback_bars, now);
        debug!("GET {}", url);
        let url = url.as_str();
        let bars = with_retry(&self.retry, symbol, move |_| self.get_once(symbol, url)).await?;
        debug!("{} {}: {} raw bars", symbol, timeframe, bars.len());
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: 0,
            factor: 2.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    fn transient() -> FetchError {
        FetchError::Transient {
            symbol: "SPY".into(),
            status: Some(503),
            message: "HTTP 503".into(),
        }
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(401), StatusClass::Auth);
        for s in [429, 500, 502, 503, 504] {
            assert_eq!(classify_status(s), StatusClass::Transient);
        }
        assert_eq!(classify_status(404), StatusClass::Other);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 8_000,
            max_attempts: 6,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(8_000));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(4), "SPY", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt < 3 { Err(transient()) } else { Ok(attempt) } }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "SPY", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "SPY", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Auth { status: 401 }) }
        })
        .await;

        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_aggs() {
        let body = r#"{"status":"OK","results":[
            {"t":1700000400000,"o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":1000},
            {"t":1700000000000,"o":1.0,"h":2.0,"l":0.5,"c":1.2}
        ]}"#;
        let bars = parse_aggs("SPY", body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, 1_700_000_400);
        assert_eq!(bars[1].volume, 0.0);

        assert!(parse_aggs("SPY", r#"{"status":"OK","resultsCount":0}"#).unwrap().is_empty());
        assert!(matches!(parse_aggs("SPY", "not json"), Err(FetchError::Decode { .. })));
    }

    #[test]
    fn test_aggs_url() {
        let client = PolygonClient::new(
            "https://api.polygon.io/",
            "KEY".into(),
            Duration::from_secs(20),
            50_000,
            RetryPolicy::default(),
        )
        .unwrap();
        let now = DateTime::parse_from_rfc3339("2024-03-15T15:00:00Z").unwrap().with_timezone(&Utc);
        let url = client.aggs_url("SPY", TimeFrame::Minutes10, 39, now);
        assert_eq!(url, "https://api.polygon.io/v2/aggs/ticker/SPY/range/10/minute/2024-03-09/2024-03-15");
        assert!(!url.contains("KEY"));
    }

    #[test]
    fn test_invalid_base_url_is_malformed_config() {
        let err = PolygonClient::new(
            "ftp://api.polygon.io",
            "KEY".into(),
            Duration::from_secs(20),
            50_000,
            RetryPolicy::default(),
        )
        .err()
        .expect("expected invalid base_url to be rejected");
        assert!(matches!(
            err.downcast_ref::<DashboardError>(),
            Some(DashboardError::MalformedConfig(_))
        ));
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }
}
