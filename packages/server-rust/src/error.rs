//! Error types for the persistence side.
//!
//! [`BackendError`] is raised by storage drivers and carries the labels the
//! transaction coordinator keys its retry decisions on. [`TransactionError`]
//! covers coordinator misuse; [`RepositoryError`] is what repository callers
//! see.

use docstore_core::{DocumentError, ValidationResult};

use crate::storage::engine::SessionId;
use crate::transaction::TransactionState;

/// Driver-signalled error label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorLabel {
    /// The whole transaction attempt may be retried without side effects.
    TransientTransactionError,
    /// The commit may or may not have applied; retrying the commit is safe.
    UnknownTransactionCommitResult,
}

/// Errors raised by a storage driver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("write conflict on {namespace} document '{id}'")]
    WriteConflict { namespace: String, id: String },

    #[error("duplicate key in {namespace} for index '{index}'")]
    DuplicateKey { namespace: String, index: String },

    #[error("session {0} does not exist")]
    NoSuchSession(SessionId),

    #[error("no transaction in progress on session {0}")]
    NoTransaction(SessionId),

    #[error("transaction already in progress on session {0}")]
    TransactionInProgress(SessionId),

    #[error("invalid pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },

    /// Generic driver failure with explicit labels.
    #[error("{message}")]
    Driver {
        message: String,
        labels: Vec<ErrorLabel>,
    },
}

impl BackendError {
    /// Creates a generic driver error carrying `labels`.
    #[must_use]
    pub fn labeled(message: impl Into<String>, labels: &[ErrorLabel]) -> Self {
        Self::Driver {
            message: message.into(),
            labels: labels.to_vec(),
        }
    }

    #[must_use]
    pub fn has_label(&self, label: ErrorLabel) -> bool {
        match self {
            Self::WriteConflict { .. } => label == ErrorLabel::TransientTransactionError,
            Self::Driver { labels, .. } => labels.contains(&label),
            _ => false,
        }
    }
}

/// Label lookup shared by every error the coordinator may retry on.
pub trait Labeled {
    fn has_label(&self, label: ErrorLabel) -> bool;
}

impl Labeled for BackendError {
    fn has_label(&self, label: ErrorLabel) -> bool {
        BackendError::has_label(self, label)
    }
}

/// Transaction coordinator misuse or backend failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction is already started")]
    AlreadyStarted,

    #[error("transaction is not started (state: {state})")]
    NotStarted { state: TransactionState },

    #[error("transaction handle no longer refers to the started transaction (state: {state})")]
    StaleHandle { state: TransactionState },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Labeled for TransactionError {
    fn has_label(&self, label: ErrorLabel) -> bool {
        match self {
            Self::Backend(e) => e.has_label(label),
            _ => false,
        }
    }
}

/// Errors surfaced by document repositories and their factory.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid query: {0}")]
    InvalidQuery(ValidationResult),

    #[error("invalid contract or document type: {contract_id}/{document_type}")]
    InvalidContractOrType {
        contract_id: String,
        document_type: String,
    },

    #[error("malformed document '{id}': {reason}")]
    MalformedDocument { id: String, reason: String },

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("contract provider failed: {0:#}")]
    Provider(anyhow::Error),
}

impl Labeled for RepositoryError {
    fn has_label(&self, label: ErrorLabel) -> bool {
        match self {
            Self::Backend(e) => e.has_label(label),
            Self::Transaction(e) => e.has_label(label),
            _ => false,
        }
    }
}
