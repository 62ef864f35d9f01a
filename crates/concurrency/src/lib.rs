//! Concurrency layer for Tempora
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - TransactionContext: buffered writes and read-set tracking
//! - Txn: cloneable handles, nested handles sharing their root's context
//! - TransactionManager: ids, commit sequence, rollback-only propagation
//!
//! Conflict detection itself is the store's job: it receives the locked
//! context during commit and validates the read set against its own
//! per-entity versions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod handle;
pub mod manager;
pub mod transaction;

pub use handle::Txn;
pub use manager::{TransactionManager, TransactionStats};
pub use transaction::{PendingOperations, PendingWrite, TransactionContext, TransactionStatus};
