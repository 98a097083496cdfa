//! One timeframe's run: fetch, flag, aggregate, score, publish.
//!
//! Per-symbol fetches run with bounded concurrency. Aggregation waits for
//! every symbol to resolve; a symbol whose fetch fails contributes nothing
//! (or its cached flags in incremental mode) instead of failing the run. The
//! benchmark is the exception: without it the composite is meaningless.

use crate::artifact::{Artifact, ArtifactMeta, BuildMode, LookbackParams, Metrics};
use crate::bar_source::{BarSource, FetchError};
use crate::cache::{CacheEntry, CacheKey, PersistentCache};
use crate::config::TimeframeProfile;
use crate::error::{DashboardError, Result};
use crate::flags::{FlagCounts, SymbolFlags};
use crate::indicators::{
    atr_volatility_pct, ema, ema_posture, ema_sign, liquidity_pct, scaled_volatility, smi, squeeze_psi,
};
use crate::market_data::{Bar, closes, volumes};
use crate::scoring::{CompositeScorer, ScoreInputs};
use crate::sectors::{
    NEUTRAL_PCT, SectorCard, SectorMembership, aggregate_sectors, market_breadth, market_momentum,
    rising_pct, risk_on_pct,
};
use crate::signals::{EngineLights, carry_last_changed, evaluate_lights};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;

/// Bars fetched to read a symbol's latest completed bucket in incremental mode
const PROBE_BARS: usize = 2;

/// Per-run inputs that are not part of the timeframe profile
#[derive(Debug, Clone)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    pub mode: BuildMode,
    /// Free-form label recorded in `meta.source`
    pub source_label: String,
    pub previous_lights: Option<EngineLights>,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>, mode: BuildMode) -> Self {
        Self {
            now,
            mode,
            source_label: "market-dashboard".to_string(),
            previous_lights: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolOutcome {
    Fresh { last_bar_time: i64, counts: FlagCounts },
    /// Latest completed bar matches the cache
    Unchanged,
}

pub struct DashboardBuilder<'a, S: BarSource> {
    source: &'a S,
    membership: &'a SectorMembership,
    profile: TimeframeProfile,
    benchmark: String,
    workers: usize,
}

impl<'a, S: BarSource> DashboardBuilder<'a, S> {
    pub fn new(
        source: &'a S,
        membership: &'a SectorMembership,
        profile: TimeframeProfile,
        benchmark: &str,
        workers: usize,
    ) -> Self {
        Self {
            source,
            membership,
            profile,
            benchmark: benchmark.trim().to_uppercase(),
            workers: workers.max(1),
        }
    }

    pub fn profile(&self) -> &TimeframeProfile {
        &self.profile
    }

    /// Run the pipeline. Incremental mode needs `cache`; it is updated in
    /// memory and left for the caller to save.
    pub async fn build(&self, ctx: &RunContext, cache: Option<&mut PersistentCache>) -> Result<Artifact> {
        let tf = self.profile.timeframe;
        let scorer = CompositeScorer::new(self.profile.scoring.clone())
            .map_err(|e| DashboardError::MalformedConfig(e.to_string()))?;

        if ctx.mode == BuildMode::Incremental && cache.is_none() {
            return Err(DashboardError::MalformedConfig(
                "incremental mode requires a cache".to_string(),
            ));
        }

        info!(
            "Building {} dashboard ({} mode, {} symbols across {} sectors, {} workers)",
            tf,
            ctx.mode,
            self.membership.symbol_count(),
            self.membership.sector_count(),
            self.workers
        );

        let benchmark_bars = self.fetch_benchmark(ctx.now).await?;
        let mut metrics = self.benchmark_metrics(&benchmark_bars);

        let symbols = self.membership.all_symbols();
        let (counts, symbols_failed) = match cache {
            Some(cache) if ctx.mode == BuildMode::Incremental => {
                self.collect_incremental(&symbols, cache, ctx.now).await?
            }
            _ => self.collect_baseline(&symbols, ctx.now).await?,
        };

        let cards = aggregate_sectors(self.membership, &counts);
        let mut degraded = Vec::new();
        self.market_metrics(&cards, &mut metrics, &mut degraded);

        let inputs = score_inputs(&metrics, &mut degraded);
        let composite = scorer.score(&inputs);
        info!(
            "{} composite {:.1} (raw {:.1}) {}",
            tf, composite.score, composite.raw_score, composite.state
        );
        if !degraded.is_empty() {
            warn!("Neutral defaults used for: {}", degraded.join(", "));
        }

        let now = ctx.now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let lights = carry_last_changed(
            evaluate_lights(&metrics, &composite, &self.profile.lights),
            ctx.previous_lights.as_ref(),
            &now,
        );

        Ok(Artifact {
            sector_cards: cards,
            metrics,
            composite_score: composite,
            engine_lights: lights,
            meta: ArtifactMeta {
                generated_at_utc: now,
                source: ctx.source_label.clone(),
                timeframe: tf.label().to_string(),
                mode: ctx.mode,
                benchmark: self.benchmark.clone(),
                lookback_params: LookbackParams {
                    lookback_bars: self.profile.lookback_bars,
                    flag_lookback: self.profile.flag_lookback,
                    streak_len: self.profile.streak_len,
                    ema_span: self.profile.ema_span,
                    psi_length: self.profile.psi_length,
                    posture_saturation_pct: self.profile.posture_saturation_pct,
                },
                symbols_requested: symbols.len(),
                symbols_failed,
                degraded,
            },
        })
    }

    async fn fetch_benchmark(&self, now: DateTime<Utc>) -> Result<Vec<Bar>> {
        let symbol = self.benchmark.as_str();
        let bars = self
            .source
            .fetch_bars(symbol, self.profile.timeframe, self.profile.lookback_bars, now)
            .await
            .map_err(|e| match e {
                FetchError::Auth { status } => DashboardError::Auth(format!("HTTP {}", status)),
                other => DashboardError::MissingBenchmark {
                    symbol: symbol.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let need = self.profile.required_bars();
        if bars.len() < need {
            return Err(DashboardError::InsufficientData {
                symbol: symbol.to_string(),
                have: bars.len(),
                need,
            });
        }
        debug!("Benchmark {}: {} completed bars", symbol, bars.len());
        Ok(bars)
    }

    /// EMA posture, squeeze, SMI, volatility and liquidity from the benchmark
    pub fn benchmark_metrics(&self, bars: &[Bar]) -> Metrics {
        let p = &self.profile;
        let close_series = closes(bars);
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

        let last_close = close_series.last().copied();
        let ema_value = ema(&close_series, p.ema_span).last().copied();
        let posture = match (last_close, ema_value) {
            (Some(c), Some(e)) => ema_posture(c, e, p.posture_saturation_pct),
            _ => None,
        };
        let sign = match (last_close, ema_value) {
            (Some(c), Some(e)) => ema_sign(c, e),
            _ => 0,
        };

        let psi = squeeze_psi(&close_series, p.psi_conv, p.psi_length);
        let smi_last = smi(&highs, &lows, &close_series, p.smi_k, p.smi_d, p.smi_ema)
            .and_then(|s| s.last());
        let volatility = atr_volatility_pct(bars, p.volatility_span);

        debug!(
            "benchmark close={:?} ema={:?} psi={:?} smi={:?} vol={:?}",
            last_close, ema_value, psi, smi_last, volatility
        );

        Metrics {
            ema_posture_pct: posture.map(|p| p.score),
            ema_dist_pct: posture.map(|p| p.dist_pct),
            ema_sign: sign,
            ema_value,
            last_close,
            squeeze_psi: psi,
            squeeze_expansion_pct: psi.map(|v| 100.0 - v),
            smi: smi_last.map(|(s, _)| s),
            smi_signal: smi_last.map(|(_, sig)| sig),
            volatility_pct: volatility,
            volatility_scaled: volatility.map(|v| scaled_volatility(v, p.volatility_scale)),
            liquidity_pct: liquidity_pct(&volumes(bars), p.liquidity_fast, p.liquidity_slow),
            ..Metrics::default()
        }
    }

    fn market_metrics(&self, cards: &[SectorCard], metrics: &mut Metrics, degraded: &mut Vec<String>) {
        metrics.breadth_pct = market_breadth(cards).unwrap_or_else(|| {
            degraded.push("breadth".to_string());
            NEUTRAL_PCT
        });
        metrics.momentum_pct = market_momentum(cards).unwrap_or_else(|| {
            degraded.push("momentum".to_string());
            NEUTRAL_PCT
        });
        metrics.rising_pct = rising_pct(cards);
        metrics.risk_on_pct = risk_on_pct(cards);
    }

    async fn evaluate_symbol(
        &self,
        symbol: &str,
        cached_bar_time: Option<i64>,
        now: DateTime<Utc>,
    ) -> std::result::Result<SymbolOutcome, FetchError> {
        let tf = self.profile.timeframe;

        if let Some(cached) = cached_bar_time {
            let probe = self.source.fetch_bars(symbol, tf, PROBE_BARS, now).await?;
            if probe.last().map(|b| b.time) == Some(cached) {
                debug!("{}: latest bar unchanged, reusing cached flags", symbol);
                return Ok(SymbolOutcome::Unchanged);
            }
        }

        let bars = self
            .source
            .fetch_bars(symbol, tf, self.profile.lookback_bars, now)
            .await?;
        let flags = SymbolFlags::from_bars(&bars, self.profile.flag_lookback, self.profile.streak_len);
        debug!("{}: {} bars, flags {:?}", symbol, bars.len(), flags);

        Ok(SymbolOutcome::Fresh {
            last_bar_time: bars.last().map_or(0, |b| b.time),
            counts: flags.counts(),
        })
    }

    /// Evaluate every symbol with at most `workers` in flight. The first
    /// auth failure stops the stream; symbols not yet started are never fetched.
    async fn evaluate_all(
        &self,
        symbols: &[String],
        cached: &HashMap<String, i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, std::result::Result<SymbolOutcome, FetchError>)>> {
        stream::iter(symbols.iter().map(|symbol| async move {
            match self
                .evaluate_symbol(symbol, cached.get(symbol).copied(), now)
                .await
            {
                Err(FetchError::Auth { status }) => {
                    Err(DashboardError::Auth(format!("HTTP {} for {}", status, symbol)))
                }
                outcome => Ok((symbol.clone(), outcome)),
            }
        }))
        .buffer_unordered(self.workers)
        .try_collect()
        .await
    }

    async fn collect_baseline(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<(HashMap<String, FlagCounts>, Vec<String>)> {
        let results = self.evaluate_all(symbols, &HashMap::new(), now).await?;

        let mut counts = HashMap::new();
        let mut failed = Vec::new();
        for (symbol, outcome) in results {
            match outcome {
                Ok(SymbolOutcome::Fresh { counts: c, .. }) => {
                    counts.insert(symbol, c);
                }
                Ok(SymbolOutcome::Unchanged) => {}
                Err(e) => {
                    warn!("{}: {}; excluded from aggregation", symbol, e);
                    failed.push(symbol);
                }
            }
        }
        failed.sort();
        info!("Baseline: {} symbols evaluated, {} failed", counts.len(), failed.len());
        Ok((counts, failed))
    }

    async fn collect_incremental(
        &self,
        symbols: &[String],
        cache: &mut PersistentCache,
        now: DateTime<Utc>,
    ) -> Result<(HashMap<String, FlagCounts>, Vec<String>)> {
        cache.bind(CacheKey::new(
            self.profile.timeframe,
            self.profile.flag_lookback,
            self.profile.streak_len,
        ));
        cache.retain_symbols(symbols);
        let cached: HashMap<String, i64> = symbols
            .iter()
            .filter_map(|s| cache.get(s).map(|e| (s.clone(), e.last_bar_time)))
            .collect();

        let results = self.evaluate_all(symbols, &cached, now).await?;

        let mut refreshed = 0usize;
        let mut failed = Vec::new();
        for (symbol, outcome) in results {
            match outcome {
                Ok(SymbolOutcome::Fresh { last_bar_time, counts }) => {
                    cache.upsert(&symbol, CacheEntry::new(last_bar_time, counts));
                    refreshed += 1;
                }
                Ok(SymbolOutcome::Unchanged) => {}
                Err(e) => {
                    if cache.get(&symbol).is_some() {
                        warn!("{}: {}; keeping stale cached flags", symbol, e);
                    } else {
                        warn!("{}: {}; excluded from aggregation", symbol, e);
                    }
                    failed.push(symbol);
                }
            }
        }
        failed.sort();
        info!(
            "Incremental: {} refreshed, {} reused from cache, {} failed",
            refreshed,
            symbols.len() - refreshed - failed.len(),
            failed.len()
        );
        Ok((cache.counts(), failed))
    }
}

/// Map metrics onto the scorer's 0..100 inputs, substituting the neutral 50
/// (and recording the name in `degraded`) for anything missing
pub fn score_inputs(metrics: &Metrics, degraded: &mut Vec<String>) -> ScoreInputs {
    let mut or_neutral = |value: Option<f64>, name: &str| {
        value.unwrap_or_else(|| {
            degraded.push(name.to_string());
            NEUTRAL_PCT
        })
    };

    ScoreInputs {
        breadth_pct: metrics.breadth_pct,
        momentum_pct: metrics.momentum_pct,
        posture_pct: or_neutral(metrics.ema_posture_pct, "ema_posture"),
        squeeze_expansion_pct: or_neutral(metrics.squeeze_expansion_pct, "squeeze"),
        // ratio runs 0..200 around a 100 baseline
        liquidity_pct: or_neutral(metrics.liquidity_pct.map(|l| l / 2.0), "liquidity"),
        risk_on_pct: or_neutral(metrics.risk_on_pct, "risk_on"),
        ema_sign: metrics.ema_sign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_inputs_record_defaults() {
        let metrics = Metrics {
            breadth_pct: 70.0,
            liquidity_pct: Some(150.0),
            risk_on_pct: Some(80.0),
            ..Metrics::default()
        };
        let mut degraded = Vec::new();
        let inputs = score_inputs(&metrics, &mut degraded);
        assert_eq!(inputs.breadth_pct, 70.0);
        assert_eq!(inputs.liquidity_pct, 75.0);
        assert_eq!(inputs.posture_pct, 50.0);
        assert_eq!(degraded, vec!["ema_posture", "squeeze"]);
    }
}
