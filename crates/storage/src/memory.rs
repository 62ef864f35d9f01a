//! In-memory fact store
//!
//! Reference implementation of [`FactStore`].
//!
//! # Design
//!
//! - DashMap of per-entity records: lock-free reads, sharded writes
//! - Writes are buffered in the transaction and overlaid on its own reads
//! - Commit validates the read set under a single commit lock
//!   (first-committer-wins) and swaps in fully rebuilt records, so a commit
//!   is visible entirely or not at all
//! - Fact ids are allocated when a write is buffered, so a merge script can
//!   name rows it inserted earlier in the same transaction

use crate::query::FactQuery;
use crate::record::EntityRecord;
use crate::traits::FactStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tempora_concurrency::{
    PendingWrite, TransactionContext, TransactionManager, TransactionStats, Txn,
};
use tempora_core::{
    EntityId, FactId, FactRow, LifecycleMarker, MergeScript, Span, StoreError, TypeName,
};
use tracing::trace;

/// In-memory [`FactStore`]
pub struct MemoryStore {
    records: DashMap<EntityId, EntityRecord>,
    commit_lock: Mutex<()>,
    next_fact_id: AtomicU64,
    manager: TransactionManager,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            commit_lock: Mutex::new(()),
            next_fact_id: AtomicU64::new(1),
            manager: TransactionManager::new(),
        }
    }

    /// Number of committed entities
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no entity has been committed
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Transaction counters
    pub fn transaction_stats(&self) -> TransactionStats {
        self.manager.stats()
    }

    /// Committed version of an entity, 0 when absent
    pub fn entity_version(&self, entity: EntityId) -> u64 {
        self.records.get(&entity).map_or(0, |r| r.version)
    }

    fn allocate_fact_id(&self) -> FactId {
        FactId::new(self.next_fact_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Run `f` over the entity as this transaction sees it
    ///
    /// Records the committed version in the read set, then overlays the
    /// transaction's own pending writes.
    fn view<R>(
        &self,
        ctx: &mut TransactionContext,
        entity: EntityId,
        f: impl FnOnce(Option<&EntityRecord>) -> R,
    ) -> Result<R, StoreError> {
        ctx.ensure_active()?;
        let committed = self.records.get(&entity);
        ctx.record_read(entity, committed.as_ref().map_or(0, |r| r.version));

        if !ctx.has_pending_for(entity) {
            return Ok(f(committed.as_deref()));
        }

        let mut overlay = committed.map(|r| r.value().clone());
        for write in ctx.pending_for(entity) {
            EntityRecord::apply_to(&mut overlay, write)?;
        }
        Ok(f(overlay.as_ref()))
    }

    fn read<R>(
        &self,
        txn: &Txn,
        entity: EntityId,
        f: impl FnOnce(Option<&EntityRecord>) -> R,
    ) -> Result<R, StoreError> {
        txn.with(|ctx| self.view(ctx, entity, f))
    }

    fn validate_and_apply(&self, ctx: &mut TransactionContext) -> Result<(), StoreError> {
        if ctx.pending().is_empty() {
            return Ok(());
        }

        let _guard = self.commit_lock.lock();
        for (entity, seen) in ctx.read_set() {
            if self.entity_version(*entity) != *seen {
                return Err(StoreError::Conflict { entity: *entity });
            }
        }

        let mut staged: FxHashMap<EntityId, Option<EntityRecord>> = FxHashMap::default();
        for write in ctx.pending() {
            let entity = write.entity();
            let slot = staged
                .entry(entity)
                .or_insert_with(|| self.records.get(&entity).map(|r| r.value().clone()));
            EntityRecord::apply_to(slot, write)?;
        }

        let touched = staged.len();
        for (entity, record) in staged {
            if let Some(mut record) = record {
                record.version += 1;
                self.records.insert(entity, record);
            }
        }
        trace!(target: "tempora::store", txn_id = ctx.txn_id, touched, "applied commit");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FactStore for MemoryStore {
    fn begin(&self, write: bool, parent: Option<&Txn>) -> Result<Txn, StoreError> {
        self.manager.begin(write, parent)
    }

    fn commit(&self, txn: &Txn) -> Result<(), StoreError> {
        self.manager
            .commit(txn, |ctx| self.validate_and_apply(ctx))
    }

    fn abort(&self, txn: &Txn, reason: &str) {
        self.manager.abort(txn, reason);
    }

    fn exists(&self, txn: &Txn, entity: EntityId) -> Result<bool, StoreError> {
        self.read(txn, entity, |r| r.is_some())
    }

    fn entity_type(&self, txn: &Txn, entity: EntityId) -> Result<Option<TypeName>, StoreError> {
        self.read(txn, entity, |r| r.map(|r| r.type_name.clone()))
    }

    fn create_entity(
        &self,
        txn: &Txn,
        entity: EntityId,
        type_name: &TypeName,
    ) -> Result<(), StoreError> {
        txn.with(|ctx| {
            if self.view(ctx, entity, |r| r.is_some())? {
                return Err(StoreError::EntityExists(entity));
            }
            ctx.push(PendingWrite::CreateEntity {
                entity,
                type_name: type_name.clone(),
            })
        })
    }

    fn query_facts(&self, txn: &Txn, query: &FactQuery) -> Result<Vec<FactRow>, StoreError> {
        self.read(txn, query.entity, |r| {
            r.map(|r| {
                r.facts
                    .iter()
                    .filter(|row| query.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
        })
    }

    fn query_existence(&self, txn: &Txn, entity: EntityId) -> Result<Option<Span>, StoreError> {
        self.read(txn, entity, |r| r.and_then(|r| r.existence))
    }

    fn apply_merge_script(&self, txn: &Txn, script: &MergeScript) -> Result<(), StoreError> {
        let entity = script.entity;
        txn.with(|ctx| {
            let unknown = self.view(ctx, entity, |record| {
                let record = record.ok_or(StoreError::MissingEntity(entity))?;
                Ok::<_, StoreError>(
                    script
                        .versions_to_close
                        .iter()
                        .find(|c| !record.fact(c.fact_id).map_or(false, FactRow::is_active))
                        .map(|c| c.fact_id),
                )
            })??;
            if let Some(fact) = unknown {
                return Err(StoreError::UnknownFact { entity, fact });
            }

            for closure in &script.versions_to_close {
                ctx.push(PendingWrite::CloseVersion {
                    entity,
                    fact_id: closure.fact_id,
                    database_to: closure.database_to,
                })?;
            }
            for fact in script.historical_versions.iter().chain(&script.new_facts) {
                ctx.push(PendingWrite::InsertFact {
                    entity,
                    row: FactRow::new(self.allocate_fact_id(), fact.clone()),
                })?;
            }
            if let Some(directive) = script.existence {
                ctx.push(PendingWrite::SetExistence { entity, directive })?;
            }
            Ok(())
        })
    }

    fn record_lifecycle(
        &self,
        txn: &Txn,
        entity: EntityId,
        marker: LifecycleMarker,
    ) -> Result<(), StoreError> {
        txn.with(|ctx| {
            if !self.view(ctx, entity, |r| r.is_some())? {
                return Err(StoreError::MissingEntity(entity));
            }
            ctx.push(PendingWrite::Lifecycle { entity, marker })
        })
    }

    fn lifecycle(&self, txn: &Txn, entity: EntityId) -> Result<Vec<LifecycleMarker>, StoreError> {
        self.read(txn, entity, |r| r.map(|r| r.markers.clone()).unwrap_or_default())
    }

    fn fact_history(
        &self,
        txn: &Txn,
        entity: EntityId,
        attribute: Option<&str>,
    ) -> Result<Vec<FactRow>, StoreError> {
        let mut rows = self.read(txn, entity, |r| {
            r.map(|r| {
                r.facts
                    .iter()
                    .filter(|row| attribute.map_or(true, |a| row.fact.attribute == a))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
        })?;
        rows.sort_by(|a, b| {
            a.fact
                .attribute
                .cmp(&b.fact.attribute)
                .then_with(|| a.fact.valid.from().cmp(&b.fact.valid.from()))
                .then_with(|| a.fact.database.from().cmp(&b.fact.database.from()))
        });
        Ok(rows)
    }
}
