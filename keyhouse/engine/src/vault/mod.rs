//! Vault lifecycle core: the state machine and the quorum ledger.
//!
//! Both layers are stateless. Every function takes the store handle
//! explicitly and keeps nothing between calls; all read-check-write
//! sequences are expressed as one guarded [`Transaction`](crate::store::Transaction)
//! and retried optimistically when a concurrent writer gets there first.

use crate::error::{KeyhouseError, StoreError};

pub mod ledger;
pub mod state;

pub use ledger::ActivationOutcome;

/// Optimistic retry budget for one guarded read-modify-write.
pub(crate) const MAX_TXN_ATTEMPTS: usize = 64;

pub(crate) fn contention(operation: &str) -> KeyhouseError {
    KeyhouseError::StoreUnavailable(StoreError::Unavailable(format!(
        "could not {operation}: {MAX_TXN_ATTEMPTS} attempts lost to concurrent writers"
    )))
}
