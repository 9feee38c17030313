//! Logging bootstrap and metric names.
//!
//! No metrics exporter is installed here; counters go to whatever recorder
//! the embedding process registers (none means they are dropped).

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Transaction retries, labelled `kind = commit | operation`.
pub const TRANSACTION_RETRIES_TOTAL: &str = "docstore_transaction_retries_total";

/// Executed queries, labelled `outcome = ok | invalid | error`.
pub const QUERIES_TOTAL: &str = "docstore_queries_total";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Installs the global `tracing` subscriber described by `config`.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if the filter directive does not
/// parse.
pub fn init_tracing(config: &LogConfig) -> Result<bool, TelemetryError> {
    let filter =
        EnvFilter::try_new(&config.log_filter).map_err(|source| TelemetryError::InvalidFilter {
            filter: config.log_filter.clone(),
            source,
        })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_format {
        LogFormat::Plain => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    Ok(installed)
}

/// Which retry loop a retry happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    Commit,
    Operation,
}

impl RetryKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Operation => "operation",
        }
    }
}

pub(crate) fn record_transaction_retry(kind: RetryKind) {
    metrics::counter!(TRANSACTION_RETRIES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Query outcome for [`QUERIES_TOTAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Ok,
    Invalid,
    Error,
}

impl QueryOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

pub(crate) fn record_query(outcome: QueryOutcome) {
    metrics::counter!(QUERIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
}
