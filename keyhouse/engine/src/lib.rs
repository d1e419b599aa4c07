//! Keyhouse engine core library
//!
//! A vault that starts sealed and only becomes usable once a quorum of
//! distinct key shares has been activated.

pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod store;
pub mod types;
pub mod vault;

pub use error::{KeyhouseError, StoreError};
pub use lifecycle::{ActivationReport, InitReport, Keyhouse, StatusReport};
pub use types::{QUORUM, SHARE_COUNT, ShareId, VaultState};

#[cfg(test)]
mod tests;
