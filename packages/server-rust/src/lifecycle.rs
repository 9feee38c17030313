//! Creation and removal of a contract's physical database.

use std::sync::Arc;

use docstore_core::{compile_index, DataContract};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::BackendError;
use crate::storage::engine::StoreDriver;

/// Creates and drops the per-contract database.
pub struct DocumentDatabaseManager {
    driver: Arc<dyn StoreDriver>,
    config: StoreConfig,
}

impl DocumentDatabaseManager {
    #[must_use]
    pub fn new(driver: Arc<dyn StoreDriver>, config: StoreConfig) -> Self {
        Self { driver, config }
    }

    /// Creates one collection per document type of `contract`, with the
    /// type's declared indices.
    ///
    /// # Errors
    ///
    /// Returns the driver error; collections created before it remain.
    pub async fn create(&self, contract: &DataContract) -> Result<(), BackendError> {
        for (document_type, schema) in &contract.documents {
            let ns = self.config.namespace(&contract.id, document_type);
            self.driver.create_collection(&ns).await?;
            for index in &schema.indices {
                self.driver.create_index(&ns, &compile_index(index)).await?;
            }
            info!(namespace = %ns, indices = schema.indices.len(), "document collection created");
        }
        Ok(())
    }

    /// Drops the database of `contract`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns the driver error.
    pub async fn drop(&self, contract: &DataContract) -> Result<bool, BackendError> {
        let database = self.config.database_name(&contract.id);
        let dropped = self.driver.drop_database(&database).await?;
        info!(database = %database, dropped, "document database dropped");
        Ok(dropped)
    }
}
