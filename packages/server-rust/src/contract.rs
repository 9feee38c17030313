//! Contract lookup.
//!
//! [`ContractProvider`] is the schema-fetch collaborator: repositories are
//! built from the [`DataContract`] it returns. Implementations may read
//! through the caller's transaction.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use docstore_core::DataContract;

use crate::transaction::TransactionHandle;

/// Fetches data contracts by id.
#[async_trait]
pub trait ContractProvider: Send + Sync + 'static {
    /// Returns `Ok(None)` if no contract has this id.
    async fn fetch_contract(
        &self,
        contract_id: &str,
        transaction: Option<&TransactionHandle>,
    ) -> anyhow::Result<Option<Arc<DataContract>>>;
}

/// Contracts held in memory, keyed by id.
#[derive(Debug, Default)]
pub struct MemoryContractProvider {
    contracts: DashMap<String, Arc<DataContract>>,
}

impl MemoryContractProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `contract`, replacing any contract with the same id.
    pub fn insert(&self, contract: DataContract) -> Arc<DataContract> {
        let contract = Arc::new(contract);
        self.contracts.insert(contract.id.clone(), Arc::clone(&contract));
        contract
    }

    pub fn remove(&self, contract_id: &str) -> Option<Arc<DataContract>> {
        self.contracts.remove(contract_id).map(|(_, c)| c)
    }
}

#[async_trait]
impl ContractProvider for MemoryContractProvider {
    async fn fetch_contract(
        &self,
        contract_id: &str,
        _transaction: Option<&TransactionHandle>,
    ) -> anyhow::Result<Option<Arc<DataContract>>> {
        Ok(self.contracts.get(contract_id).map(|c| Arc::clone(c.value())))
    }
}
