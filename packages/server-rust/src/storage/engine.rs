//! Backing-store driver traits.
//!
//! [`SessionDriver`] exposes the session/transaction primitives the
//! [`TransactionCoordinator`](crate::transaction::TransactionCoordinator)
//! mediates; [`StoreDriver`] adds collection CRUD, index management and
//! compiled-query execution. Both are used as `Arc<dyn ...>`.

use std::fmt;

use async_trait::async_trait;
use docstore_core::{CompiledQuery, IndexSpec};
use uuid::Uuid;

use super::record::StoredDocument;
use crate::error::BackendError;

/// Opaque backing-store session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Physical `database.collection` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    #[must_use]
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Session and multi-document transaction primitives.
#[async_trait]
pub trait SessionDriver: Send + Sync + 'static {
    async fn start_session(&self) -> Result<SessionId, BackendError>;

    async fn start_transaction(&self, session: SessionId) -> Result<(), BackendError>;

    /// May fail with an `UnknownTransactionCommitResult`-labelled error, in
    /// which case retrying the commit is safe.
    async fn commit_transaction(&self, session: SessionId) -> Result<(), BackendError>;

    async fn abort_transaction(&self, session: SessionId) -> Result<(), BackendError>;

    /// Ends the session, aborting any open transaction.
    async fn end_session(&self, session: SessionId) -> Result<(), BackendError>;
}

/// Collection-level operations. `session` scopes reads and writes to that
/// session's open transaction, if any.
#[async_trait]
pub trait StoreDriver: SessionDriver {
    /// Returns `false` if the collection already existed.
    async fn create_collection(&self, ns: &Namespace) -> Result<bool, BackendError>;

    /// Returns `false` if there was nothing to drop.
    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, BackendError>;

    async fn drop_database(&self, database: &str) -> Result<bool, BackendError>;

    async fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<(), BackendError>;

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexSpec>, BackendError>;

    /// Upserts by `_id`, replacing the whole stored representation.
    async fn replace_one(
        &self,
        ns: &Namespace,
        document: StoredDocument,
        session: Option<SessionId>,
    ) -> Result<(), BackendError>;

    /// Returns `true` if a document was deleted.
    async fn delete_one(
        &self,
        ns: &Namespace,
        id: &str,
        session: Option<SessionId>,
    ) -> Result<bool, BackendError>;

    async fn find_one(
        &self,
        ns: &Namespace,
        id: &str,
        session: Option<SessionId>,
    ) -> Result<Option<StoredDocument>, BackendError>;

    /// Executes a compiled query, projecting `_id` only.
    async fn find_ids(
        &self,
        ns: &Namespace,
        query: &CompiledQuery,
        session: Option<SessionId>,
    ) -> Result<Vec<String>, BackendError>;
}
