//! Engine lights: boolean signals derived from one run's metrics, each
//! stamped with the time it last flipped.

use crate::artifact::Metrics;
use crate::scoring::{CompositeScore, MarketState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightThresholds {
    /// PSI at or above this lights "compression"
    #[serde(default = "default_compression_psi")]
    pub compression_psi: f64,
    /// PSI at or below this lights "expansion"
    #[serde(default = "default_expansion_psi")]
    pub expansion_psi: f64,
    #[serde(default = "default_strong_pct")]
    pub strong_pct: f64,
    #[serde(default = "default_weak_pct")]
    pub weak_pct: f64,
    /// Liquidity ratio (100 = baseline) below this lights "liquidityLow"
    #[serde(default = "default_liquidity_low")]
    pub liquidity_low: f64,
}

fn default_compression_psi() -> f64 {
    70.0
}
fn default_expansion_psi() -> f64 {
    30.0
}
fn default_strong_pct() -> f64 {
    60.0
}
fn default_weak_pct() -> f64 {
    40.0
}
fn default_liquidity_low() -> f64 {
    80.0
}

impl Default for LightThresholds {
    fn default() -> Self {
        Self {
            compression_psi: default_compression_psi(),
            expansion_psi: default_expansion_psi(),
            strong_pct: default_strong_pct(),
            weak_pct: default_weak_pct(),
            liquidity_low: default_liquidity_low(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Light {
    pub active: bool,
    /// RFC 3339 time the light last changed state
    pub last_changed: String,
}

pub type EngineLights = BTreeMap<String, Light>;

/// Current on/off state of every light
pub fn evaluate_lights(
    metrics: &Metrics,
    score: &CompositeScore,
    thresholds: &LightThresholds,
) -> BTreeMap<String, bool> {
    let psi = metrics.squeeze_psi;
    let mut lights = BTreeMap::new();

    lights.insert("overallBull".to_string(), score.state == MarketState::Bull);
    lights.insert("overallBear".to_string(), score.state == MarketState::Bear);
    lights.insert(
        "compression".to_string(),
        psi.is_some_and(|p| p >= thresholds.compression_psi),
    );
    lights.insert(
        "expansion".to_string(),
        psi.is_some_and(|p| p <= thresholds.expansion_psi),
    );
    lights.insert("breadthStrong".to_string(), metrics.breadth_pct >= thresholds.strong_pct);
    lights.insert("breadthWeak".to_string(), metrics.breadth_pct <= thresholds.weak_pct);
    lights.insert("momentumStrong".to_string(), metrics.momentum_pct >= thresholds.strong_pct);
    lights.insert("momentumWeak".to_string(), metrics.momentum_pct <= thresholds.weak_pct);
    lights.insert(
        "liquidityLow".to_string(),
        metrics.liquidity_pct.is_some_and(|l| l < thresholds.liquidity_low),
    );

    lights
}

/// Stamp each light with `now` if it flipped (or is new) since `previous`,
/// otherwise keep the previous stamp
pub fn carry_last_changed(
    current: BTreeMap<String, bool>,
    previous: Option<&EngineLights>,
    now: &str,
) -> EngineLights {
    current
        .into_iter()
        .map(|(name, active)| {
            let last_changed = match previous.and_then(|p| p.get(&name)) {
                Some(prev) if prev.active == active => prev.last_changed.clone(),
                _ => now.to_string(),
            };
            (name, Light { active, last_changed })
        })
        .collect()
}
