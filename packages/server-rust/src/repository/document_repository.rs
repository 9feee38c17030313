//! Per-document-type repository over a [`StoreDriver`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use docstore_core::{
    compile_index, compile_query, CompiledQuery, Document, DocumentSchema, IndexDefinition,
    QueryValidator, ValidationResult,
};
use tracing::{debug, info_span, Instrument};

use crate::error::{RepositoryError, TransactionError};
use crate::storage::engine::{Namespace, SessionId, StoreDriver};
use crate::storage::record::StoredDocument;
use crate::telemetry::{record_query, QueryOutcome};
use crate::transaction::TransactionHandle;

/// Session to scope an operation to. A handle whose transaction has ended
/// is refused rather than silently falling back to autocommit.
fn session_of(
    transaction: Option<&TransactionHandle>,
) -> Result<Option<SessionId>, TransactionError> {
    transaction.map(TransactionHandle::active_session).transpose()
}

/// Stores, deletes and queries the documents of one document type.
///
/// Every operation takes an optional transaction; with one, reads and writes
/// go through that transaction's session and see its uncommitted writes.
pub struct DocumentRepository {
    driver: Arc<dyn StoreDriver>,
    namespace: Namespace,
    contract_id: String,
    document_type: String,
    schema: DocumentSchema,
    indexed: BTreeSet<String>,
    validator: QueryValidator,
}

impl DocumentRepository {
    #[must_use]
    pub fn new(
        driver: Arc<dyn StoreDriver>,
        namespace: Namespace,
        contract_id: impl Into<String>,
        document_type: impl Into<String>,
        schema: DocumentSchema,
    ) -> Self {
        let indexed = schema.indexed_properties();
        Self {
            driver,
            namespace,
            contract_id: contract_id.into(),
            document_type: document_type.into(),
            schema,
            indexed,
            validator: QueryValidator::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    #[must_use]
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    #[must_use]
    pub fn schema(&self) -> &DocumentSchema {
        &self.schema
    }

    // -----------------------------------------------------------------------
    // Collection lifecycle
    // -----------------------------------------------------------------------

    /// Creates the collection and one index per definition, defaulting to
    /// the schema's declared indices.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on driver failure.
    pub async fn create_collection(
        &self,
        indices: Option<&[IndexDefinition]>,
    ) -> Result<(), RepositoryError> {
        let created = self.driver.create_collection(&self.namespace).await?;
        let indices = indices.unwrap_or(self.schema.indices.as_slice());
        for index in indices {
            self.driver
                .create_index(&self.namespace, &compile_index(index))
                .await?;
        }
        debug!(
            namespace = %self.namespace,
            created,
            indices = indices.len(),
            "collection ready"
        );
        Ok(())
    }

    /// Drops the collection. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on driver failure.
    pub async fn remove_collection(&self) -> Result<bool, RepositoryError> {
        Ok(self.driver.drop_collection(&self.namespace).await?)
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Upserts `document`, replacing its whole stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::MalformedDocument`] if the document belongs
    /// to another type, or the encoding or driver error.
    pub async fn store(
        &self,
        document: &Document,
        transaction: Option<&TransactionHandle>,
    ) -> Result<(), RepositoryError> {
        if document.document_type != self.document_type {
            return Err(RepositoryError::MalformedDocument {
                id: document.id.clone(),
                reason: format!(
                    "document type '{}' does not match repository type '{}'",
                    document.document_type, self.document_type
                ),
            });
        }

        let stored = StoredDocument::project(document, &self.indexed)?;
        self.driver
            .replace_one(&self.namespace, stored, session_of(transaction)?)
            .await?;
        debug!(
            database = %self.namespace.database,
            collection = %self.namespace.collection,
            id = %document.id,
            "document stored"
        );
        Ok(())
    }

    /// Deletes a document by id. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Transaction`] for an ended transaction, or
    /// [`RepositoryError::Backend`] on driver failure.
    pub async fn delete(
        &self,
        id: &str,
        transaction: Option<&TransactionHandle>,
    ) -> Result<bool, RepositoryError> {
        let deleted = self
            .driver
            .delete_one(&self.namespace, id, session_of(transaction)?)
            .await?;
        debug!(
            database = %self.namespace.database,
            collection = %self.namespace.collection,
            id,
            deleted,
            "document deleted"
        );
        Ok(deleted)
    }

    /// Loads the full document.
    ///
    /// # Errors
    ///
    /// Returns the driver error or [`RepositoryError::Document`] if the
    /// stored payload does not decode.
    pub async fn fetch(
        &self,
        id: &str,
        transaction: Option<&TransactionHandle>,
    ) -> Result<Option<Document>, RepositoryError> {
        let stored = self
            .driver
            .find_one(&self.namespace, id, session_of(transaction)?)
            .await?;
        Ok(stored.as_ref().map(StoredDocument::decode).transpose()?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Validates `raw` against the document schema.
    #[must_use]
    pub fn validate(&self, raw: &serde_json::Value) -> ValidationResult {
        self.validator.validate(raw, &self.schema)
    }

    /// Validates, compiles and runs `raw`, returning matching ids in sort
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidQuery`] with every violated rule, or
    /// the driver error.
    pub async fn find(
        &self,
        raw: &serde_json::Value,
        transaction: Option<&TransactionHandle>,
    ) -> Result<Vec<String>, RepositoryError> {
        let span = info_span!(
            "find",
            namespace = %self.namespace,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = match self.validator.prepare(raw, &self.schema) {
                Ok(query) => self.find_compiled(&compile_query(&query), transaction).await,
                Err(errors) => Err(RepositoryError::InvalidQuery(errors)),
            };

            let outcome = match &result {
                Ok(_) => QueryOutcome::Ok,
                Err(RepositoryError::InvalidQuery(_)) => QueryOutcome::Invalid,
                Err(_) => QueryOutcome::Error,
            };
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome.as_str());
            record_query(outcome);

            result
        }
        .instrument(span)
        .await
    }

    /// Runs an already compiled query.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on driver failure.
    pub async fn find_compiled(
        &self,
        query: &CompiledQuery,
        transaction: Option<&TransactionHandle>,
    ) -> Result<Vec<String>, RepositoryError> {
        debug!(
            namespace = %self.namespace,
            filter = %query.filter_document(),
            skip = query.skip,
            limit = query.limit,
            "executing query"
        );
        Ok(self
            .driver
            .find_ids(&self.namespace, query, session_of(transaction)?)
            .await?)
    }
}
