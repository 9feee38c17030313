//! Store configuration.
//!
//! Every setting can come from a flag or an environment variable; defaults
//! apply when neither is present.

use clap::{Args, Parser, ValueEnum};

use crate::storage::engine::Namespace;

/// Default prefix of per-contract physical database names.
pub const DEFAULT_DATABASE_PREFIX: &str = "docstore_";

/// Persistence-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "docstore", about = "Document store configuration")]
pub struct StoreConfig {
    /// Prefix of every physical per-contract database name.
    #[arg(long, env = "DOCUMENT_DB_PREFIX", default_value = DEFAULT_DATABASE_PREFIX)]
    pub database_prefix: String,

    #[command(flatten)]
    pub log: LogConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_prefix: DEFAULT_DATABASE_PREFIX.to_string(),
            log: LogConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Reads configuration from environment variables only, ignoring the
    /// process arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`clap::Error`] if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["docstore"])
    }

    /// Physical database holding the documents of `contract_id`.
    #[must_use]
    pub fn database_name(&self, contract_id: &str) -> String {
        format!("{}{contract_id}", self.database_prefix)
    }

    /// Physical collection of one document type of a contract.
    #[must_use]
    pub fn namespace(&self, contract_id: &str, document_type: &str) -> Namespace {
        Namespace::new(self.database_name(contract_id), document_type)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging settings consumed by [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `docstore_server=debug`.
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Plain,
        }
    }
}
