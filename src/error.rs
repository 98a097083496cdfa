use thiserror::Error;

/// Whole-run failures. Anything that reaches `main` as one of these aborts the
/// build and maps to a process exit code.
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("Authentication rejected by market data provider ({0}); check the API key environment variable")]
    Auth(String),

    #[error("Benchmark {symbol} unavailable: {reason}")]
    MissingBenchmark { symbol: String, reason: String },

    #[error("Insufficient data for {symbol}: have {have} bars, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("Cache {path} was modified by another run (expected version {expected}, found {found})")]
    CacheConflict {
        path: String,
        expected: u64,
        found: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DashboardError {
    /// Exit code 2 marks fatal configuration/data errors
    pub fn exit_code(&self) -> u8 {
        match self {
            DashboardError::MalformedConfig(_)
            | DashboardError::Auth(_)
            | DashboardError::MissingBenchmark { .. }
            | DashboardError::InsufficientData { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;

/// Process exit code for an error that reached the CLI edge. The first
/// `DashboardError` anywhere in the context chain decides; anything else is 1.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DashboardError>())
        .map_or(1, DashboardError::exit_code)
}
