//! Backing store engine implementations.

pub mod memory;

pub use memory::MemoryStore;
