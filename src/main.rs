use market_dashboard::artifact::{BuildMode, qa_report, read_artifact, read_previous_lights, validate_artifact, write_artifact};
use market_dashboard::bar_source::PolygonClient;
use market_dashboard::cache::PersistentCache;
use market_dashboard::config::DashboardConfig;
use market_dashboard::error::{DashboardError, exit_code_for};
use market_dashboard::market_data::TimeFrame;
use market_dashboard::pipeline::{DashboardBuilder, RunContext};
use market_dashboard::sectors::SectorMembership;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "market-dashboard")]
#[command(about = "Sector breadth, momentum and composite score artifacts", long_about = None)]
struct Cli {
    /// Optional JSON config; built-in defaults when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bars and write one timeframe's artifact
    Build {
        /// 10m, 30m, 1h, 4h or 1d
        #[arg(short, long)]
        timeframe: TimeFrame,
        #[arg(short, long)]
        out: PathBuf,
        /// Previous artifact for light carry-over (defaults to --out)
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        sectors_dir: Option<PathBuf>,
        #[arg(long)]
        lookback_bars: Option<usize>,
        #[arg(long, default_value = "baseline")]
        mode: BuildMode,
        /// Cache for incremental mode (defaults to the configured per-timeframe path)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Recompute market ratios from the sector cards and diff them
    Qa {
        artifact: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        tolerance: f64,
    },
    /// Best-effort schema check; warnings only
    Validate { artifact: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logger with default info level if RUST_LOG not set
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = DashboardConfig::load_from_file(cli.config.as_deref())?;
    config
        .apply_env(|name| env::var(name).ok())
        .map_err(|e| DashboardError::MalformedConfig(e.to_string()))?;
    config
        .validate()
        .map_err(|e| DashboardError::MalformedConfig(e.to_string()))?;

    match cli.command {
        Commands::Build {
            timeframe,
            out,
            source,
            sectors_dir,
            lookback_bars,
            mode,
            cache,
        } => {
            if lookback_bars.is_some() {
                config.lookback_override = lookback_bars;
            }
            build(&config, timeframe, out, source, sectors_dir, mode, cache).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Qa { artifact, tolerance } => {
            let artifact = read_artifact(&artifact)?;
            let report = qa_report(&artifact, tolerance);
            println!("{}", report);
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Validate { artifact } => {
            let text = fs::read_to_string(&artifact)
                .with_context(|| format!("Reading {}", artifact.display()))?;
            let doc: serde_json::Value = serde_json::from_str(&text)?;
            let warnings = validate_artifact(&doc);
            if warnings.is_empty() {
                println!("OK {}", artifact.display());
            }
            for w in &warnings {
                println!("WARN {}", w);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn build(
    config: &DashboardConfig,
    timeframe: TimeFrame,
    out: PathBuf,
    source: Option<PathBuf>,
    sectors_dir: Option<PathBuf>,
    mode: BuildMode,
    cache_path: Option<PathBuf>,
) -> Result<()> {
    let profile = config
        .profile(timeframe)
        .map_err(|e| DashboardError::MalformedConfig(e.to_string()))?;

    // Everything local is checked before the first network call
    let sectors_dir = sectors_dir.unwrap_or_else(|| config.sectors_dir.clone());
    let membership = SectorMembership::load_dir(&sectors_dir)?;

    let api_key = config.resolve_api_key(|name| env::var(name).ok()).ok_or_else(|| {
        DashboardError::Auth(format!(
            "no API key found in any of {}",
            config.api.api_key_env.join(", ")
        ))
    })?;

    let client = PolygonClient::new(
        &config.api.base_url,
        api_key,
        Duration::from_secs(config.api.timeout_secs),
        config.api.page_limit,
        config.retry.clone(),
    )?;

    let source_path = source.unwrap_or_else(|| out.clone());
    let ctx = RunContext {
        source_label: source_path.display().to_string(),
        previous_lights: read_previous_lights(&source_path),
        ..RunContext::new(Utc::now(), mode)
    };

    let builder = DashboardBuilder::new(
        &client,
        &membership,
        profile,
        &config.benchmark,
        config.worker_count(),
    );

    let artifact = match mode {
        BuildMode::Baseline => builder.build(&ctx, None).await?,
        BuildMode::Incremental => {
            let path = cache_path.unwrap_or_else(|| config.cache_path_for(timeframe));
            let mut cache = PersistentCache::load(&path);
            let artifact = builder.build(&ctx, Some(&mut cache)).await?;
            cache.save()?;
            artifact
        }
    };

    if !artifact.meta.symbols_failed.is_empty() {
        warn!(
            "{} of {} symbols failed: {}",
            artifact.meta.symbols_failed.len(),
            artifact.meta.symbols_requested,
            artifact.meta.symbols_failed.join(", ")
        );
    }
    for w in validate_artifact(&serde_json::to_value(&artifact)?) {
        warn!("validation: {}", w);
    }

    write_artifact(&out, &artifact)?;
    info!("Done: {} {}", timeframe, artifact.composite_score.state);
    Ok(())
}
