//! Document repositories and the factory that builds them from contracts.

pub mod document_repository;
pub mod factory;

pub use document_repository::DocumentRepository;
pub use factory::DocumentRepositoryFactory;
