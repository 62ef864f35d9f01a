//! Transaction context for optimistic concurrency control
//!
//! A [`TransactionContext`] buffers every write a transaction makes and
//! records the version of every entity it reads. Nothing reaches the store
//! until commit, where the read set is validated (first-committer-wins) and
//! the buffered writes are applied all at once or not at all.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tempora_core::{
    EntityId, ExistenceDirective, FactId, FactRow, LifecycleMarker, StoreError, TypeName,
};

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (validation passed)
/// - `Validating` → `Aborted` (conflict detected)
/// - `Active` → `Aborted` (caller abort or error)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated for conflicts
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// A buffered store mutation
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Create an entity of the given type
    CreateEntity {
        /// New entity
        entity: EntityId,
        /// Its registered type
        type_name: TypeName,
    },
    /// Stamp the database end of an existing version
    CloseVersion {
        /// Owning entity
        entity: EntityId,
        /// Version to close
        fact_id: FactId,
        /// Database end to stamp
        database_to: DateTime<Utc>,
    },
    /// Insert a new fact row
    InsertFact {
        /// Owning entity
        entity: EntityId,
        /// Row with its pre-allocated id
        row: FactRow,
    },
    /// Establish or widen existence
    SetExistence {
        /// Owning entity
        entity: EntityId,
        /// Change to apply
        directive: ExistenceDirective,
    },
    /// Append a lifecycle marker
    Lifecycle {
        /// Owning entity
        entity: EntityId,
        /// Marker to append
        marker: LifecycleMarker,
    },
}

impl PendingWrite {
    /// Entity the write touches
    pub fn entity(&self) -> EntityId {
        match self {
            PendingWrite::CreateEntity { entity, .. }
            | PendingWrite::CloseVersion { entity, .. }
            | PendingWrite::InsertFact { entity, .. }
            | PendingWrite::SetExistence { entity, .. }
            | PendingWrite::Lifecycle { entity, .. } => *entity,
        }
    }
}

/// Summary of pending operations that would be rolled back on abort
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOperations {
    /// Entities to create
    pub creates: usize,
    /// Versions to close
    pub closures: usize,
    /// Fact rows to insert
    pub inserts: usize,
    /// Existence and lifecycle changes
    pub other: usize,
}

impl PendingOperations {
    /// Total number of pending operations
    pub fn total(&self) -> usize {
        self.creates + self.closures + self.inserts + self.other
    }

    /// Check if there are no pending operations
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Per-transaction state shared by a root handle and all of its nested handles
#[derive(Debug)]
pub struct TransactionContext {
    /// Transaction id
    pub txn_id: u64,
    write: bool,
    status: TransactionStatus,
    rollback_only: bool,
    pending: Vec<PendingWrite>,
    read_set: FxHashMap<EntityId, u64>,
}

impl TransactionContext {
    /// Create an active context
    pub fn new(txn_id: u64, write: bool) -> Self {
        Self {
            txn_id,
            write,
            status: TransactionStatus::Active,
            rollback_only: false,
            pending: Vec::new(),
            read_set: FxHashMap::default(),
        }
    }

    /// Whether the transaction may buffer writes
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Whether the transaction can still read and write
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Whether a nested scope aborted
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Fail unless the transaction is active
    pub fn ensure_active(&self) -> Result<(), StoreError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StoreError::InvalidTransaction(format!(
                "transaction {} is {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Record the version of `entity` seen by this transaction
    ///
    /// Only the first observation counts: later reads of the same entity
    /// must not mask a change that happened in between.
    pub fn record_read(&mut self, entity: EntityId, version: u64) {
        self.read_set.entry(entity).or_insert(version);
    }

    /// Versions observed by this transaction
    pub fn read_set(&self) -> &FxHashMap<EntityId, u64> {
        &self.read_set
    }

    /// Buffer a write
    pub fn push(&mut self, write: PendingWrite) -> Result<(), StoreError> {
        self.ensure_active()?;
        if !self.write {
            return Err(StoreError::ReadOnlyTransaction(self.txn_id));
        }
        self.pending.push(write);
        Ok(())
    }

    /// All buffered writes in submission order
    pub fn pending(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Buffered writes touching `entity`, in submission order
    pub fn pending_for(&self, entity: EntityId) -> impl Iterator<Item = &PendingWrite> {
        self.pending.iter().filter(move |w| w.entity() == entity)
    }

    /// Whether any buffered write touches `entity`
    pub fn has_pending_for(&self, entity: EntityId) -> bool {
        self.pending.iter().any(|w| w.entity() == entity)
    }

    /// Counts of buffered writes by kind
    pub fn pending_operations(&self) -> PendingOperations {
        let mut ops = PendingOperations::default();
        for write in &self.pending {
            match write {
                PendingWrite::CreateEntity { .. } => ops.creates += 1,
                PendingWrite::CloseVersion { .. } => ops.closures += 1,
                PendingWrite::InsertFact { .. } => ops.inserts += 1,
                PendingWrite::SetExistence { .. } | PendingWrite::Lifecycle { .. } => {
                    ops.other += 1
                }
            }
        }
        ops
    }

    /// Mark the transaction so its commit can only fail
    pub fn mark_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Active → Validating
    pub fn begin_validation(&mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Validating → Committed
    pub fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
        self.pending.clear();
    }

    /// Any non-terminal state → Aborted, discarding buffered writes
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        if matches!(
            self.status,
            TransactionStatus::Committed | TransactionStatus::Aborted { .. }
        ) {
            return;
        }
        self.status = TransactionStatus::Aborted {
            reason: reason.into(),
        };
        self.pending.clear();
    }
}
