//! Docstore server: document repositories over a transactional backing
//! store.
//!
//! Queries are validated and compiled by `docstore-core`; this crate
//! executes them through a [`StoreDriver`], coordinates multi-document
//! transactions with their retry rules, and manages the per-contract
//! physical databases.

pub mod config;
pub mod contract;
pub mod error;
pub mod lifecycle;
pub mod repository;
pub mod storage;
pub mod telemetry;
pub mod transaction;
pub mod transaction_group;

pub use config::{LogConfig, LogFormat, StoreConfig};
pub use contract::{ContractProvider, MemoryContractProvider};
pub use error::{BackendError, ErrorLabel, Labeled, RepositoryError, TransactionError};
pub use lifecycle::DocumentDatabaseManager;
pub use repository::{DocumentRepository, DocumentRepositoryFactory};
pub use storage::{MemoryStore, Namespace, SessionDriver, SessionId, StoreDriver, StoredDocument};
pub use telemetry::init_tracing;
pub use transaction::{TransactionCoordinator, TransactionHandle, TransactionState};
pub use transaction_group::TransactionGroup;
