use crate::bar_source::RetryPolicy;
use crate::error::DashboardError;
use crate::market_data::TimeFrame;
use crate::scoring::{Guardrail, ScoreWeights, ScoringPolicy};
use crate::signals::LightThresholds;
use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    #[serde(default = "default_sectors_dir")]
    pub sectors_dir: PathBuf,
    /// Incremental cache; `{tf}` expands to the timeframe label
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Keyed by timeframe label ("10m", "1d", ...)
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileOverride>,
    /// Environment overrides, applied on top of the selected profile
    #[serde(skip)]
    pub lookback_override: Option<usize>,
    #[serde(skip)]
    pub psi_length_override: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Checked in order, first non-empty wins
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            page_limit: default_page_limit(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.polygon.io".to_string()
}
fn default_api_key_env() -> Vec<String> {
    ["POLYGON_API_KEY", "POLYGON_KEY", "POLY_API_KEY", "MARKET_DATA_API_KEY"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_page_limit() -> u32 {
    50_000
}
fn default_workers() -> usize {
    8
}
fn default_benchmark() -> String {
    "SPY".to_string()
}
fn default_sectors_dir() -> PathBuf {
    PathBuf::from("data/sectors")
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache_{tf}.json")
}

/// Partial profile from the config file; unset fields keep the built-in value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverride {
    pub lookback_bars: Option<usize>,
    pub flag_lookback: Option<usize>,
    pub streak_len: Option<usize>,
    pub ema_span: Option<usize>,
    pub posture_saturation_pct: Option<f64>,
    pub psi_conv: Option<f64>,
    pub psi_length: Option<usize>,
    pub volatility_scale: Option<f64>,
    pub weights: Option<ScoreWeights>,
    pub bull_min_score: Option<f64>,
    pub bear_max_score: Option<f64>,
    pub guardrail: Option<Guardrail>,
    pub dead_zone_breaker: Option<bool>,
    pub lights: Option<LightThresholds>,
}

/// Every window, weight and threshold one timeframe's pipeline runs with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeProfile {
    pub timeframe: TimeFrame,
    pub lookback_bars: usize,
    pub flag_lookback: usize,
    pub streak_len: usize,
    pub ema_span: usize,
    pub posture_saturation_pct: f64,
    pub psi_conv: f64,
    pub psi_length: usize,
    pub smi_k: usize,
    pub smi_d: usize,
    pub smi_ema: usize,
    pub volatility_span: usize,
    pub liquidity_fast: usize,
    pub liquidity_slow: usize,
    pub volatility_scale: f64,
    pub scoring: ScoringPolicy,
    pub lights: LightThresholds,
}

impl TimeframeProfile {
    pub fn builtin(timeframe: TimeFrame) -> Self {
        let (lookback_bars, ema_span, posture_saturation_pct) = match timeframe {
            TimeFrame::Minutes10 | TimeFrame::Minutes30 => (120, 10, 0.60),
            TimeFrame::Hour1 => (150, 20, 1.00),
            TimeFrame::Hours4 => (150, 20, 1.25),
            TimeFrame::Daily => (260, 50, 2.00),
        };

        let scoring = match timeframe {
            TimeFrame::Minutes10 | TimeFrame::Minutes30 => ScoringPolicy {
                dead_zone_breaker: true,
                ..ScoringPolicy::default()
            },
            TimeFrame::Hour1 | TimeFrame::Hours4 => ScoringPolicy {
                guardrail: Guardrail::StateBand,
                ..ScoringPolicy::default()
            },
            TimeFrame::Daily => ScoringPolicy {
                weights: ScoreWeights::ema_led(),
                guardrail: Guardrail::StateBand,
                ..ScoringPolicy::default()
            },
        };

        Self {
            timeframe,
            lookback_bars,
            flag_lookback: 20,
            streak_len: 3,
            ema_span,
            posture_saturation_pct,
            psi_conv: 50.0,
            psi_length: 20,
            smi_k: 12,
            smi_d: 7,
            smi_ema: 5,
            volatility_span: 3,
            liquidity_fast: 3,
            liquidity_slow: 12,
            volatility_scale: timeframe.volatility_display_scale(),
            scoring,
            lights: LightThresholds::default(),
        }
    }

    fn merge(&mut self, o: &ProfileOverride) {
        if let Some(v) = o.lookback_bars {
            self.lookback_bars = v;
        }
        if let Some(v) = o.flag_lookback {
            self.flag_lookback = v;
        }
        if let Some(v) = o.streak_len {
            self.streak_len = v;
        }
        if let Some(v) = o.ema_span {
            self.ema_span = v;
        }
        if let Some(v) = o.posture_saturation_pct {
            self.posture_saturation_pct = v;
        }
        if let Some(v) = o.psi_conv {
            self.psi_conv = v;
        }
        if let Some(v) = o.psi_length {
            self.psi_length = v;
        }
        if let Some(v) = o.volatility_scale {
            self.volatility_scale = v;
        }
        if let Some(v) = &o.weights {
            self.scoring.weights = v.clone();
        }
        if let Some(v) = o.bull_min_score {
            self.scoring.bull_min_score = v;
        }
        if let Some(v) = o.bear_max_score {
            self.scoring.bear_max_score = v;
        }
        if let Some(v) = o.guardrail {
            self.scoring.guardrail = v;
        }
        if let Some(v) = o.dead_zone_breaker {
            self.scoring.dead_zone_breaker = v;
        }
        if let Some(v) = &o.lights {
            self.lights = v.clone();
        }
    }

    /// Fewest benchmark bars the EMA, squeeze and SMI legs can work with
    pub fn required_bars(&self) -> usize {
        let smi_min = self.smi_k.max(self.smi_d).max(self.smi_ema) + 5;
        (self.psi_length + 2).max(smi_min).max(self.ema_span)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookback_bars < self.required_bars() {
            return Err(anyhow!(
                "{}: lookback_bars {} is below the {} bars the indicators need",
                self.timeframe,
                self.lookback_bars,
                self.required_bars()
            ));
        }
        if self.flag_lookback == 0 || self.streak_len < 2 {
            return Err(anyhow!(
                "{}: flag_lookback must be positive and streak_len at least 2",
                self.timeframe
            ));
        }
        if !(self.posture_saturation_pct > 0.0) {
            return Err(anyhow!(
                "{}: posture_saturation_pct must be positive, got {}",
                self.timeframe,
                self.posture_saturation_pct
            ));
        }
        if self.liquidity_fast == 0 || self.liquidity_slow < self.liquidity_fast {
            return Err(anyhow!(
                "{}: liquidity spans must satisfy 0 < fast <= slow",
                self.timeframe
            ));
        }
        self.scoring.weights.validate()
    }
}

impl DashboardConfig {
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("No config file given, using built-in defaults");
            return Ok(Self::default());
        };

        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                anyhow::Error::from(DashboardError::MalformedConfig(format!(
                    "config file {}: {}",
                    path.display(),
                    e
                )))
            }),
            Err(e) => {
                warn!(
                    "Could not read config {}: {}. Using built-in defaults.",
                    path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Cache file for one timeframe. A path without `{tf}` is used as is.
    pub fn cache_path_for(&self, timeframe: TimeFrame) -> PathBuf {
        let template = self.cache_path.to_string_lossy();
        if template.contains("{tf}") {
            PathBuf::from(template.replace("{tf}", timeframe.label()))
        } else {
            self.cache_path.clone()
        }
    }

    /// Apply `DASHBOARD_*` overrides. `lookup` stands in for the process
    /// environment so tests stay hermetic.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DASHBOARD_WORKERS") {
            self.workers = parse_env("DASHBOARD_WORKERS", &v)?;
        }
        if let Some(v) = lookup("DASHBOARD_LOOKBACK_BARS") {
            self.lookback_override = Some(parse_env("DASHBOARD_LOOKBACK_BARS", &v)?);
        }
        if let Some(v) = lookup("DASHBOARD_PSI_LENGTH") {
            self.psi_length_override = Some(parse_env("DASHBOARD_PSI_LENGTH", &v)?);
        }
        if let Some(v) = lookup("DASHBOARD_BENCHMARK") {
            let v = v.trim().to_uppercase();
            if !v.is_empty() {
                self.benchmark = v;
            }
        }
        Ok(())
    }

    /// First configured API key variable holding a non-empty value
    pub fn resolve_api_key<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.api
            .api_key_env
            .iter()
            .filter_map(|name| lookup(name.as_str()))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    /// Built-in profile, then file override, then environment override
    pub fn profile(&self, timeframe: TimeFrame) -> Result<TimeframeProfile> {
        let mut profile = TimeframeProfile::builtin(timeframe);
        if let Some(o) = self.profiles.get(timeframe.label()) {
            profile.merge(o);
        }
        if let Some(v) = self.lookback_override {
            profile.lookback_bars = v;
        }
        if let Some(v) = self.psi_length_override {
            profile.psi_length = v;
        }
        profile.validate()?;
        Ok(profile)
    }

    /// Reject override keys that are not timeframe labels
    pub fn validate(&self) -> Result<()> {
        for key in self.profiles.keys() {
            key.parse::<TimeFrame>()
                .map_err(|e| anyhow!("Unknown profile key {:?}: {}", key, e))?;
        }
        if self.benchmark.trim().is_empty() {
            return Err(anyhow!("Benchmark symbol must not be empty"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a non-negative integer, got {:?}", name, value))
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryPolicy::default(),
            workers: default_workers(),
            benchmark: default_benchmark(),
            sectors_dir: default_sectors_dir(),
            cache_path: default_cache_path(),
            profiles: BTreeMap::new(),
            lookback_override: None,
            psi_length_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_builtin_profiles_validate() {
        for tf in TimeFrame::all() {
            let profile = TimeframeProfile::builtin(tf);
            assert!(profile.validate().is_ok(), "{} profile invalid", tf);
        }
        let daily = TimeframeProfile::builtin(TimeFrame::Daily);
        assert_eq!(daily.ema_span, 50);
        assert_eq!(daily.scoring.weights, ScoreWeights::ema_led());
    }

    #[test]
    fn test_api_key_first_present_wins() {
        let config = DashboardConfig::default();
        let lookup = env(&[("POLY_API_KEY", "third"), ("POLYGON_KEY", "  "), ("MARKET_DATA_API_KEY", "fourth")]);
        assert_eq!(config.resolve_api_key(lookup).as_deref(), Some("third"));
        assert_eq!(config.resolve_api_key(env(&[])), None);
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let mut config = DashboardConfig::default();
        config.apply_env(env(&[
            ("DASHBOARD_WORKERS", "64"),
            ("DASHBOARD_LOOKBACK_BARS", "200"),
            ("DASHBOARD_BENCHMARK", "qqq"),
        ]))?;
        assert_eq!(config.worker_count(), MAX_WORKERS);
        assert_eq!(config.benchmark, "QQQ");
        assert_eq!(config.profile(TimeFrame::Hour1)?.lookback_bars, 200);

        let mut bad = DashboardConfig::default();
        assert!(bad.apply_env(env(&[("DASHBOARD_WORKERS", "many")])).is_err());
        Ok(())
    }

    #[test]
    fn test_file_overrides_merge_over_builtin() -> Result<()> {
        let json = r#"{
            "workers": 4,
            "profiles": { "4h": { "ema_span": 30, "guardrail": "none" } }
        }"#;
        let config: DashboardConfig = serde_json::from_str(json)?;
        config.validate()?;
        let profile = config.profile(TimeFrame::Hours4)?;
        assert_eq!(profile.ema_span, 30);
        assert_eq!(profile.scoring.guardrail, Guardrail::None);
        assert_eq!(profile.lookback_bars, 150);
        assert_eq!(config.api.timeout_secs, 20);
        Ok(())
    }

    #[test]
    fn test_short_lookback_rejected() {
        let mut config = DashboardConfig::default();
        config.lookback_override = Some(10);
        assert!(config.profile(TimeFrame::Minutes10).is_err());

        let bad_key: DashboardConfig =
            serde_json::from_str(r#"{"profiles": {"2h": {}}}"#).unwrap();
        assert!(bad_key.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> Result<()> {
        let config = DashboardConfig::load_from_file(Some(Path::new("/nonexistent/dashboard.json")))?;
        assert_eq!(config.benchmark, "SPY");
        Ok(())
    }

    #[test]
    fn test_unparseable_file_is_malformed_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json")?;

        let err = DashboardConfig::load_from_file(Some(&path)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DashboardError>(),
            Some(DashboardError::MalformedConfig(_))
        ));
        assert_eq!(crate::error::exit_code_for(&err), 2);
        Ok(())
    }

    #[test]
    fn test_cache_path_per_timeframe() -> Result<()> {
        let config = DashboardConfig::default();
        assert_eq!(config.cache_path_for(TimeFrame::Hours4), PathBuf::from("data/cache_4h.json"));
        assert_eq!(config.cache_path_for(TimeFrame::Hour1), PathBuf::from("data/cache_1h.json"));

        let fixed: DashboardConfig = serde_json::from_str(r#"{"cache_path": "/var/cache/dash.json"}"#)?;
        assert_eq!(fixed.cache_path_for(TimeFrame::Daily), PathBuf::from("/var/cache/dash.json"));
        Ok(())
    }
}
