//! The store collaborator
//!
//! [`FactStore`] is the narrow interface the engine persists through. Every
//! operation runs inside a transaction handle obtained from the same store;
//! writes are buffered in the transaction and become visible on commit.

use crate::query::FactQuery;
use tempora_concurrency::Txn;
use tempora_core::{
    EntityId, FactRow, LifecycleMarker, MergeScript, Span, StoreError, TypeName,
};

/// Storage abstraction for bitemporal facts
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads, including concurrently on the same transaction handle
/// (requires Send + Sync).
pub trait FactStore: Send + Sync {
    /// Open a transaction, or continue `parent` if one is given
    fn begin(&self, write: bool, parent: Option<&Txn>) -> Result<Txn, StoreError>;

    /// Commit a transaction
    ///
    /// Committing a nested handle is a no-op; the root commit publishes
    /// everything.
    ///
    /// # Errors
    ///
    /// - `Conflict` if another commit changed an entity this one read
    /// - `RollbackOnly` if a nested scope aborted
    fn commit(&self, txn: &Txn) -> Result<(), StoreError>;

    /// Abort a transaction, discarding buffered writes
    fn abort(&self, txn: &Txn, reason: &str);

    /// Whether the entity exists
    fn exists(&self, txn: &Txn, entity: EntityId) -> Result<bool, StoreError>;

    /// Registered type of the entity, `None` if it does not exist
    fn entity_type(&self, txn: &Txn, entity: EntityId) -> Result<Option<TypeName>, StoreError>;

    /// Create an entity
    ///
    /// # Errors
    ///
    /// Returns `EntityExists` if the id is taken.
    fn create_entity(&self, txn: &Txn, entity: EntityId, type_name: &TypeName)
        -> Result<(), StoreError>;

    /// Fact rows selected by `query`
    fn query_facts(&self, txn: &Txn, query: &FactQuery) -> Result<Vec<FactRow>, StoreError>;

    /// Recorded existence of the entity
    fn query_existence(&self, txn: &Txn, entity: EntityId) -> Result<Option<Span>, StoreError>;

    /// Buffer every change a merge script describes
    ///
    /// # Errors
    ///
    /// - `MissingEntity` if the entity does not exist
    /// - `UnknownFact` if a closure names a row that is absent or already closed
    fn apply_merge_script(&self, txn: &Txn, script: &MergeScript) -> Result<(), StoreError>;

    /// Append a lifecycle marker
    fn record_lifecycle(
        &self,
        txn: &Txn,
        entity: EntityId,
        marker: LifecycleMarker,
    ) -> Result<(), StoreError>;

    /// Lifecycle markers in the order they were recorded
    fn lifecycle(&self, txn: &Txn, entity: EntityId) -> Result<Vec<LifecycleMarker>, StoreError>;

    /// Every version of every fact of the entity, optionally for one attribute
    ///
    /// Ordered by attribute, then valid start, then database start.
    fn fact_history(
        &self,
        txn: &Txn,
        entity: EntityId,
        attribute: Option<&str>,
    ) -> Result<Vec<FactRow>, StoreError>;
}
