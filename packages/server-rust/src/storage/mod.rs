//! Backing-store layer.
//!
//! - [`engine`]: driver traits ([`SessionDriver`], [`StoreDriver`]) and
//!   addressing types shared by every engine
//! - [`record`]: the physical [`StoredDocument`] shape
//! - [`matcher`]: filter and sort evaluation for engines without a native
//!   query planner
//! - [`engines`]: concrete engines

pub mod engine;
pub mod engines;
pub mod matcher;
pub mod record;

pub use engine::*;
pub use engines::MemoryStore;
pub use record::StoredDocument;
