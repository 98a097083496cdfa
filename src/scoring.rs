//! Composite Scorer
//!
//! Maps each 0..100 market reading onto a signed point contribution of up to
//! its weight, adds the contributions to a neutral 50 and classifies the
//! clamped result into bull/neutral/bear. Optional guardrails run strictly
//! after classification.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative weights of each score component.
///
/// Each weight is the component's point budget: a reading of 100 adds
/// `+weight` and a reading of 0 adds `-weight`. Weights must sum to `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub ema: f64,
    pub momentum: f64,
    pub breadth: f64,
    pub squeeze: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub risk_on: f64,
    #[serde(default = "default_weight_total")]
    pub total: f64,
}

fn default_weight_total() -> f64 {
    100.0
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            ema: 40.0,
            momentum: 25.0,
            breadth: 10.0,
            squeeze: 10.0,
            liquidity: 10.0,
            risk_on: 5.0,
            total: default_weight_total(),
        }
    }
}

impl ScoreWeights {
    /// Daily profile: EMA-led with no liquidity or risk-on leg
    pub fn ema_led() -> Self {
        Self {
            ema: 50.0,
            momentum: 25.0,
            breadth: 15.0,
            squeeze: 10.0,
            liquidity: 0.0,
            risk_on: 0.0,
            total: default_weight_total(),
        }
    }

    fn as_array(&self) -> [f64; 6] {
        [
            self.ema,
            self.momentum,
            self.breadth,
            self.squeeze,
            self.liquidity,
            self.risk_on,
        ]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Validate weights are non-negative and sum to `total`
    pub fn validate(&self) -> Result<()> {
        if !(self.total.is_finite() && self.total > 0.0) {
            return Err(anyhow!("Score weight total must be positive, got: {}", self.total));
        }
        if self.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(anyhow!("Score weights must be finite and non-negative: {:?}", self));
        }
        let sum = self.sum();
        if (sum - self.total).abs() > 1e-6 {
            return Err(anyhow!(
                "Score weights must sum to {:.3}, got: {:.3}",
                self.total,
                sum
            ));
        }
        Ok(())
    }
}

/// Post-classification clamp of the displayed score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guardrail {
    #[default]
    None,
    /// bull → [55, 100], neutral → [45, 65], bear → [0, 45]
    StateBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default = "default_bull_min")]
    pub bull_min_score: f64,
    #[serde(default = "default_bear_max")]
    pub bear_max_score: f64,
    #[serde(default)]
    pub guardrail: Guardrail,
    /// Nudge an exact 50.0 to 51/49 in the EMA direction
    #[serde(default)]
    pub dead_zone_breaker: bool,
}

fn default_bull_min() -> f64 {
    60.0
}

fn default_bear_max() -> f64 {
    60.0
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            bull_min_score: default_bull_min(),
            bear_max_score: default_bear_max(),
            guardrail: Guardrail::None,
            dead_zone_breaker: false,
        }
    }
}

/// Inputs on a 0..100 scale with 50 neutral
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub breadth_pct: f64,
    pub momentum_pct: f64,
    pub posture_pct: f64,
    pub squeeze_expansion_pct: f64,
    pub liquidity_pct: f64,
    pub risk_on_pct: f64,
    pub ema_sign: i8,
}

impl Default for ScoreInputs {
    fn default() -> Self {
        Self {
            breadth_pct: 50.0,
            momentum_pct: 50.0,
            posture_pct: 50.0,
            squeeze_expansion_pct: 50.0,
            liquidity_pct: 50.0,
            risk_on_pct: 50.0,
            ema_sign: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketState {
    Bull,
    Neutral,
    Bear,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketState::Bull => "bull",
            MarketState::Neutral => "neutral",
            MarketState::Bear => "bear",
        };
        write!(f, "{}", s)
    }
}

/// Signed point contribution of each input
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponents {
    pub ema: f64,
    pub momentum: f64,
    pub breadth: f64,
    pub squeeze: f64,
    pub liquidity: f64,
    pub risk_on: f64,
}

impl ScoreComponents {
    pub fn total(&self) -> f64 {
        self.ema + self.momentum + self.breadth + self.squeeze + self.liquidity + self.risk_on
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeScore {
    pub score: f64,
    /// Score before guardrail / dead-zone adjustments
    pub raw_score: f64,
    pub state: MarketState,
    pub components: ScoreComponents,
    pub ema_sign: i8,
}

pub struct CompositeScorer {
    policy: ScoringPolicy,
}

impl CompositeScorer {
    pub fn new(policy: ScoringPolicy) -> Result<Self> {
        policy.weights.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn score(&self, inputs: &ScoreInputs) -> CompositeScore {
        let w = &self.policy.weights;
        let ema_sign = inputs.ema_sign.signum();

        let components = ScoreComponents {
            ema: if ema_sign == 0 {
                0.0
            } else {
                contribution(w.ema, inputs.posture_pct)
            },
            momentum: contribution(w.momentum, inputs.momentum_pct),
            breadth: contribution(w.breadth, inputs.breadth_pct),
            squeeze: contribution(w.squeeze, inputs.squeeze_expansion_pct),
            liquidity: contribution(w.liquidity, inputs.liquidity_pct),
            risk_on: contribution(w.risk_on, inputs.risk_on_pct),
        };

        let raw_score = round1((50.0 + components.total()).clamp(0.0, 100.0));
        let state = classify(raw_score, ema_sign, &self.policy);

        let mut score = apply_guardrail(raw_score, state, self.policy.guardrail);
        if self.policy.dead_zone_breaker {
            score = break_dead_zone(score, ema_sign);
        }

        CompositeScore {
            score,
            raw_score,
            state,
            components,
            ema_sign,
        }
    }
}

/// `points * (pct - 50) / 50` with the input clamped to 0..100; non-finite
/// inputs count as neutral
fn contribution(points: f64, pct: f64) -> f64 {
    if !pct.is_finite() {
        return 0.0;
    }
    points * (pct.clamp(0.0, 100.0) - 50.0) / 50.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Bull needs EMA confirmation above; bear needs it below
pub fn classify(score: f64, ema_sign: i8, policy: &ScoringPolicy) -> MarketState {
    if ema_sign > 0 && score >= policy.bull_min_score {
        MarketState::Bull
    } else if ema_sign < 0 && score < policy.bear_max_score {
        MarketState::Bear
    } else {
        MarketState::Neutral
    }
}

pub fn apply_guardrail(score: f64, state: MarketState, guardrail: Guardrail) -> f64 {
    match guardrail {
        Guardrail::None => score,
        Guardrail::StateBand => match state {
            MarketState::Bull => score.clamp(55.0, 100.0),
            MarketState::Neutral => score.clamp(45.0, 65.0),
            MarketState::Bear => score.clamp(0.0, 45.0),
        },
    }
}

pub fn break_dead_zone(score: f64, ema_sign: i8) -> f64 {
    if score != 50.0 {
        return score;
    }
    match ema_sign {
        s if s > 0 => 51.0,
        s if s < 0 => 49.0,
        _ => score,
    }
}
