//! Storage layer for Tempora
//!
//! This crate defines the store collaborator and its reference backend:
//! - FactStore: transactional read/query/write interface over facts
//! - FactQuery: selection of fact rows along both time axes
//! - in_transaction: "continue if given, else open new" scope helper
//! - MemoryStore: DashMap-backed store with first-committer-wins commits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod query;
pub mod record;
pub mod scope;
pub mod traits;

pub use memory::MemoryStore;
pub use query::{DatabaseFilter, FactQuery, ValidFilter};
pub use record::EntityRecord;
pub use scope::in_transaction;
pub use traits::FactStore;
