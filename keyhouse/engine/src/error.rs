//! Centralized keyhouse error types.

use thiserror::Error;

use crate::types::VaultState;

/// Failures raised by a [`StateStore`](crate::store::StateStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend unreachable, timed out, or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Filesystem failure in a file-backed store.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted document could not be decoded.
    #[error("store document corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Error kinds surfaced by the vault lifecycle.
#[derive(Error, Debug)]
pub enum KeyhouseError {
    /// Backing store unreachable or I/O failure. Transient; callers may retry.
    #[error("{0}")]
    StoreUnavailable(#[from] StoreError),
    /// Operation not permitted from the vault's current state.
    #[error("cannot {operation} while vault is {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: VaultState,
    },
    /// Activation attempted with an id outside the current share set.
    #[error("invalid key")]
    UnknownShare,
    /// Stored data contradicts the lifecycle invariants. Always a bug.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl KeyhouseError {
    pub(crate) fn invalid_transition(operation: &'static str, state: VaultState) -> Self {
        KeyhouseError::InvalidStateTransition { operation, state }
    }

    pub(crate) fn inconsistent(reason: impl Into<String>) -> Self {
        KeyhouseError::InternalInconsistency(reason.into())
    }

    /// True for errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyhouseError::StoreUnavailable(_))
    }
}

pub type Result<T, E = KeyhouseError> = std::result::Result<T, E>;
