//! Artifact Writer
//!
//! The JSON document the dashboard UI reads: eleven sector cards in fixed
//! order, a flat metrics block, the composite score, engine lights and run
//! metadata. Also hosts the best-effort validator and the QA diff that
//! re-derives market ratios from the published cards.

use crate::cache::write_atomic;
use crate::error::Result;
use crate::scoring::CompositeScore;
use crate::sectors::{
    NEUTRAL_PCT, Sector, SectorCard, market_breadth, market_momentum, rising_pct, risk_on_pct,
};
use crate::signals::EngineLights;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub sector_cards: Vec<SectorCard>,
    pub metrics: Metrics,
    pub composite_score: CompositeScore,
    pub engine_lights: EngineLights,
    pub meta: ArtifactMeta,
}

/// Whole-market readings. `None` means the value could not be computed and
/// serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub breadth_pct: f64,
    pub momentum_pct: f64,
    pub rising_pct: Option<f64>,
    pub risk_on_pct: Option<f64>,
    pub ema_posture_pct: Option<f64>,
    pub ema_dist_pct: Option<f64>,
    pub ema_sign: i8,
    pub ema_value: Option<f64>,
    pub last_close: Option<f64>,
    pub squeeze_psi: Option<f64>,
    pub squeeze_expansion_pct: Option<f64>,
    pub smi: Option<f64>,
    pub smi_signal: Option<f64>,
    pub volatility_pct: Option<f64>,
    /// Display only, never scored
    pub volatility_scaled: Option<f64>,
    pub liquidity_pct: Option<f64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            breadth_pct: NEUTRAL_PCT,
            momentum_pct: NEUTRAL_PCT,
            rising_pct: None,
            risk_on_pct: None,
            ema_posture_pct: None,
            ema_dist_pct: None,
            ema_sign: 0,
            ema_value: None,
            last_close: None,
            squeeze_psi: None,
            squeeze_expansion_pct: None,
            smi: None,
            smi_signal: None,
            volatility_pct: None,
            volatility_scaled: None,
            liquidity_pct: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Baseline,
    Incremental,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Baseline => write!(f, "baseline"),
            BuildMode::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(BuildMode::Baseline),
            "incremental" => Ok(BuildMode::Incremental),
            other => Err(format!("Unknown mode: {} (expected baseline|incremental)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookbackParams {
    pub lookback_bars: usize,
    pub flag_lookback: usize,
    pub streak_len: usize,
    pub ema_span: usize,
    pub psi_length: usize,
    pub posture_saturation_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMeta {
    pub generated_at_utc: String,
    pub source: String,
    pub timeframe: String,
    pub mode: BuildMode,
    pub benchmark: String,
    pub lookback_params: LookbackParams,
    pub symbols_requested: usize,
    #[serde(default)]
    pub symbols_failed: Vec<String>,
    /// Score inputs that fell back to the neutral default
    #[serde(default)]
    pub degraded: Vec<String>,
}

pub fn write_artifact(path: &Path, artifact: &Artifact) -> Result<()> {
    let json = serde_json::to_string_pretty(artifact)?;
    write_atomic(path, json.as_bytes())?;
    info!(
        "Wrote {} artifact to {} (score {:.1}, {})",
        artifact.meta.timeframe,
        path.display(),
        artifact.composite_score.score,
        artifact.composite_score.state
    );
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<Artifact> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Engine lights of a previous artifact, if it exists and parses
pub fn read_previous_lights(path: &Path) -> Option<EngineLights> {
    let text = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    match serde_json::from_value(value.get("engineLights")?.clone()) {
        Ok(lights) => Some(lights),
        Err(e) => {
            warn!("Ignoring unreadable engineLights in {}: {}", path.display(), e);
            None
        }
    }
}

const CARD_NUMERIC_FIELDS: [&str; 6] = ["breadth_pct", "momentum_pct", "nh", "nl", "up", "down"];

/// Best-effort structural checks. Returns warnings and never fails; consumers
/// treat neutral defaults as the documented degraded state.
pub fn validate_artifact(doc: &Value) -> Vec<String> {
    let mut warnings = Vec::new();

    match doc.get("sectorCards").and_then(Value::as_array) {
        None => warnings.push("sectorCards missing or not an array".to_string()),
        Some(cards) => {
            if cards.len() != Sector::ALL.len() {
                warnings.push(format!(
                    "sectorCards has {} entries, expected {}",
                    cards.len(),
                    Sector::ALL.len()
                ));
            }
            let names: Vec<&str> = cards
                .iter()
                .filter_map(|c| c.get("sector").and_then(Value::as_str))
                .collect();
            for sector in Sector::ALL {
                if !names.contains(&sector.name()) {
                    warnings.push(format!("sector {} missing", sector));
                }
            }
            for (i, card) in cards.iter().enumerate() {
                for field in CARD_NUMERIC_FIELDS {
                    if !card.get(field).is_some_and(Value::is_number) {
                        warnings.push(format!("sectorCards[{}].{} is not numeric", i, field));
                    }
                }
            }
        }
    }

    match doc.get("metrics").and_then(Value::as_object) {
        None => warnings.push("metrics missing or not an object".to_string()),
        Some(metrics) => {
            for (key, value) in metrics {
                if !(value.is_number() || value.is_null()) {
                    warnings.push(format!("metrics.{} is not numeric", key));
                }
            }
            for key in ["breadth_pct", "momentum_pct"] {
                if !metrics.contains_key(key) {
                    warnings.push(format!("metrics.{} missing", key));
                }
            }
        }
    }

    match doc.get("compositeScore") {
        None => warnings.push("compositeScore missing".to_string()),
        Some(score) => {
            match score.get("score").and_then(Value::as_f64) {
                Some(s) if (0.0..=100.0).contains(&s) => {}
                Some(s) => warnings.push(format!("compositeScore.score {} outside 0..100", s)),
                None => warnings.push("compositeScore.score is not numeric".to_string()),
            }
            let state = score.get("state").and_then(Value::as_str);
            if !matches!(state, Some("bull" | "neutral" | "bear")) {
                warnings.push(format!("compositeScore.state invalid: {:?}", state));
            }
        }
    }

    if doc.get("meta").and_then(|m| m.get("generatedAtUtc")).is_none() {
        warnings.push("meta.generatedAtUtc missing".to_string());
    }

    for w in &warnings {
        debug!("validation: {}", w);
    }
    warnings
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaCheck {
    pub field: &'static str,
    pub published: Option<f64>,
    pub recomputed: Option<f64>,
    pub pass: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaReport {
    pub tolerance: f64,
    pub checks: Vec<QaCheck>,
}

impl QaReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.pass)
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "null".to_string())
}

impl fmt::Display for QaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.checks {
            writeln!(
                f,
                "{} {}: published={} recomputed={}",
                if c.pass { "PASS" } else { "FAIL" },
                c.field,
                fmt_opt(c.published),
                fmt_opt(c.recomputed)
            )?;
        }
        write!(
            f,
            "{} (tolerance {})",
            if self.passed() { "OK" } else { "MISMATCH" },
            self.tolerance
        )
    }
}

fn check(field: &'static str, published: Option<f64>, recomputed: Option<f64>, tolerance: f64) -> QaCheck {
    let pass = match (published, recomputed) {
        (Some(p), Some(r)) => (p - r).abs() <= tolerance,
        (None, None) => true,
        _ => false,
    };
    QaCheck {
        field,
        published,
        recomputed,
        pass,
    }
}

/// Recompute breadth, momentum, rising and risk-on from the sector cards and
/// compare them with the published metrics
pub fn qa_report(artifact: &Artifact, tolerance: f64) -> QaReport {
    let cards = &artifact.sector_cards;
    let m = &artifact.metrics;
    QaReport {
        tolerance,
        checks: vec![
            check(
                "breadth_pct",
                Some(m.breadth_pct),
                Some(market_breadth(cards).unwrap_or(NEUTRAL_PCT)),
                tolerance,
            ),
            check(
                "momentum_pct",
                Some(m.momentum_pct),
                Some(market_momentum(cards).unwrap_or(NEUTRAL_PCT)),
                tolerance,
            ),
            check("rising_pct", m.rising_pct, rising_pct(cards), tolerance),
            check("risk_on_pct", m.risk_on_pct, risk_on_pct(cards), tolerance),
        ],
    }
}
