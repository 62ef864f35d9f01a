//! Transaction scopes
//!
//! Internal operations compose by passing an optional parent handle down.
//! [`in_transaction`] continues the parent when one is given and opens a new
//! root otherwise, so nested sub-operations never double-commit.

use crate::traits::FactStore;
use std::fmt::Display;
use tempora_concurrency::Txn;
use tempora_core::StoreError;
use tracing::debug;

/// Run `f` inside a transaction scope
///
/// On `Ok` the scope commits (a no-op for a continued parent). On `Err` it
/// aborts, which for a continued parent marks the root rollback-only.
pub fn in_transaction<S, R, E, F>(
    store: &S,
    parent: Option<&Txn>,
    write: bool,
    f: F,
) -> Result<R, E>
where
    S: FactStore + ?Sized,
    E: From<StoreError> + Display,
    F: FnOnce(&Txn) -> Result<R, E>,
{
    let txn = store.begin(write, parent)?;
    match f(&txn) {
        Ok(value) => {
            store.commit(&txn)?;
            Ok(value)
        }
        Err(e) => {
            let reason = e.to_string();
            debug!(target: "tempora::txn", txn_id = txn.id(), nested = txn.is_nested(), reason = %reason, "scope failed");
            store.abort(&txn, &reason);
            Err(e)
        }
    }
}
