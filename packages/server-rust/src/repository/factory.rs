//! Builds [`DocumentRepository`] instances from contracts.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::contract::ContractProvider;
use crate::error::RepositoryError;
use crate::repository::DocumentRepository;
use crate::storage::engine::StoreDriver;
use crate::transaction::TransactionHandle;

/// Resolves `(contract, document type)` pairs to repositories.
pub struct DocumentRepositoryFactory {
    driver: Arc<dyn StoreDriver>,
    contracts: Arc<dyn ContractProvider>,
    config: StoreConfig,
}

impl DocumentRepositoryFactory {
    #[must_use]
    pub fn new(
        driver: Arc<dyn StoreDriver>,
        contracts: Arc<dyn ContractProvider>,
        config: StoreConfig,
    ) -> Self {
        Self {
            driver,
            contracts,
            config,
        }
    }

    /// Creates the repository for `document_type` of `contract_id`, reading
    /// the contract through `transaction` when given.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidContractOrType`] if the contract or
    /// the document type does not exist, or [`RepositoryError::Provider`] if
    /// the lookup itself fails.
    pub async fn create(
        &self,
        contract_id: &str,
        document_type: &str,
        transaction: Option<&TransactionHandle>,
    ) -> Result<DocumentRepository, RepositoryError> {
        let contract = self
            .contracts
            .fetch_contract(contract_id, transaction)
            .await
            .map_err(RepositoryError::Provider)?;

        let Some(schema) = contract
            .as_deref()
            .and_then(|c| c.document_schema(document_type))
        else {
            return Err(RepositoryError::InvalidContractOrType {
                contract_id: contract_id.to_string(),
                document_type: document_type.to_string(),
            });
        };

        Ok(DocumentRepository::new(
            Arc::clone(&self.driver),
            self.config.namespace(contract_id, document_type),
            contract_id,
            document_type,
            schema.clone(),
        ))
    }
}
