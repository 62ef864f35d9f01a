//! Transaction handles
//!
//! A [`Txn`] is a cheap, cloneable handle onto a shared
//! [`TransactionContext`]. Nested handles point at their root's context, so
//! everything a nested scope buffers is committed (or discarded) with the
//! root.

use crate::transaction::TransactionContext;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Handle onto a transaction
#[derive(Clone)]
pub struct Txn {
    ctx: Arc<Mutex<TransactionContext>>,
    id: u64,
    write: bool,
    nested: bool,
}

impl Txn {
    pub(crate) fn root(ctx: TransactionContext) -> Self {
        let id = ctx.txn_id;
        let write = ctx.is_write();
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            id,
            write,
            nested: false,
        }
    }

    pub(crate) fn child(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            id: self.id,
            write: self.write,
            nested: true,
        }
    }

    /// Id of the root transaction
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the transaction may write
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Whether this handle continues an enclosing transaction
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Whether both handles share one transaction context
    pub fn same_transaction(&self, other: &Txn) -> bool {
        Arc::ptr_eq(&self.ctx, &other.ctx)
    }

    /// Run `f` with exclusive access to the shared context
    pub fn with<R>(&self, f: impl FnOnce(&mut TransactionContext) -> R) -> R {
        let mut ctx = self.ctx.lock();
        f(&mut ctx)
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("write", &self.write)
            .field("nested", &self.nested)
            .finish()
    }
}
