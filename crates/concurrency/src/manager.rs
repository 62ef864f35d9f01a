//! Transaction manager for coordinating transaction lifecycle
//!
//! Hands out transaction ids, opens root and nested handles, and drives the
//! commit sequence. The store supplies the validate-and-apply step; the
//! manager owns the state transitions around it.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Nested handle: return Ok without touching the context
//! 2. Rollback-only root: abort and return RollbackOnly
//! 3. begin_validation() - Change state to Validating
//! 4. apply(ctx) - Store validates the read set and applies pending writes
//! 5. IF apply failed: mark_aborted() and return the error
//! 6. mark_committed() - Change state to Committed
//! ```
//!
//! ## Abort
//!
//! Aborting a nested handle does not end the transaction. It marks the
//! shared context rollback-only, so the root's eventual commit fails and
//! nothing the nested scope buffered can become visible.

use crate::handle::Txn;
use crate::transaction::TransactionContext;
use std::sync::atomic::{AtomicU64, Ordering};
use tempora_core::StoreError;
use tracing::{debug, warn};

/// Transaction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Root transactions opened
    pub started: u64,
    /// Root transactions committed
    pub committed: u64,
    /// Root transactions aborted, explicitly or by a failed commit
    pub aborted: u64,
}

impl TransactionStats {
    /// Root transactions neither committed nor aborted
    pub fn active(&self) -> u64 {
        self.started.saturating_sub(self.committed + self.aborted)
    }
}

/// Manages transaction ids and lifecycle
pub struct TransactionManager {
    /// Next transaction ID
    next_txn_id: AtomicU64,
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl TransactionManager {
    /// Create a manager whose first transaction gets id 1
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        }
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Open a transaction, or continue `parent` if one is given
    ///
    /// # Errors
    ///
    /// - `InvalidTransaction` if `parent` is no longer active
    /// - `ReadOnlyTransaction` if a write scope is requested under a
    ///   read-only parent
    pub fn begin(&self, write: bool, parent: Option<&Txn>) -> Result<Txn, StoreError> {
        if let Some(parent) = parent {
            parent.with(|ctx| ctx.ensure_active())?;
            if write && !parent.is_write() {
                return Err(StoreError::ReadOnlyTransaction(parent.id()));
            }
            return Ok(parent.child());
        }

        let txn_id = self.next_txn_id();
        self.started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tempora::txn", txn_id, write, "begin");
        Ok(Txn::root(TransactionContext::new(txn_id, write)))
    }

    /// Commit a transaction
    ///
    /// `apply` runs with the context locked and in `Validating` state. It
    /// must either apply every pending write or none of them.
    pub fn commit<F>(&self, txn: &Txn, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TransactionContext) -> Result<(), StoreError>,
    {
        if txn.is_nested() {
            return txn.with(|ctx| ctx.ensure_active());
        }

        let result = txn.with(|ctx| {
            if ctx.is_rollback_only() {
                ctx.mark_aborted("rollback-only");
                return Err(StoreError::RollbackOnly(ctx.txn_id));
            }
            ctx.begin_validation()?;
            match apply(ctx) {
                Ok(()) => {
                    ctx.mark_committed();
                    Ok(())
                }
                Err(e) => {
                    ctx.mark_aborted(e.to_string());
                    Err(e)
                }
            }
        });

        match &result {
            Ok(()) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                debug!(target: "tempora::txn", txn_id = txn.id(), "commit");
            }
            Err(StoreError::InvalidTransaction(_)) => {}
            Err(e) => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
                if e.is_conflict() {
                    debug!(target: "tempora::txn", txn_id = txn.id(), error = %e, "commit conflict");
                } else {
                    warn!(target: "tempora::txn", txn_id = txn.id(), error = %e, "commit failed");
                }
            }
        }
        result
    }

    /// Abort a transaction
    ///
    /// Aborting a nested handle marks the root rollback-only. Aborting a
    /// finished transaction is a no-op.
    pub fn abort(&self, txn: &Txn, reason: &str) {
        if txn.is_nested() {
            txn.with(|ctx| ctx.mark_rollback_only());
            debug!(target: "tempora::txn", txn_id = txn.id(), reason, "nested abort, marked rollback-only");
            return;
        }

        let was_active = txn.with(|ctx| {
            let active = ctx.is_active();
            ctx.mark_aborted(reason);
            active
        });
        if was_active {
            self.aborted.fetch_add(1, Ordering::Relaxed);
            debug!(target: "tempora::txn", txn_id = txn.id(), reason, "abort");
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
