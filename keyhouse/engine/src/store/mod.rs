//! State store abstraction backing the vault lifecycle.
//!
//! The lifecycle keeps everything it knows (vault state, init code,
//! activation counter, one entry per share) in a small key/value store.
//! Any backend satisfying [`StateStore`] works; multi-key updates go through
//! [`StateStore::commit`], which applies a guarded batch atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Logical key names used by the lifecycle.
pub mod keys {
    use crate::types::ShareId;

    pub const VAULT_STATE: &str = "vault-state";
    pub const INIT_CODE: &str = "init-code";
    pub const ACTIVE_COUNT: &str = "active-count";
    pub const SHARE_PREFIX: &str = "share:";

    pub fn share(id: &ShareId) -> String {
        format!("{SHARE_PREFIX}{}", id.as_str())
    }

    /// Inverse of [`share`]; `None` for keys outside the share namespace.
    pub fn share_id(key: &str) -> Option<ShareId> {
        key.strip_prefix(SHARE_PREFIX).map(ShareId::new)
    }
}

/// Precondition checked before a transaction's writes are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Equals(String, String),
    Absent(String),
}

/// A single write inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Set(String, String),
    Delete(String),
}

/// Guarded write batch: all writes apply if and only if every guard holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    guards: Vec<Guard>,
    writes: Vec<Write>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to hold `expected`, or to be absent when `expected` is `None`.
    pub fn expect(mut self, key: &str, expected: Option<&str>) -> Self {
        self.guards.push(match expected {
            Some(value) => Guard::Equals(key.to_string(), value.to_string()),
            None => Guard::Absent(key.to_string()),
        });
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.writes.push(Write::Set(key.to_string(), value.into()));
        self
    }

    pub fn delete(mut self, key: &str) -> Self {
        self.writes.push(Write::Delete(key.to_string()));
        self
    }

    /// Check guards against `map` and apply writes in order. Returns `false`
    /// without touching `map` when any guard fails.
    pub(crate) fn apply_to(&self, map: &mut BTreeMap<String, String>) -> bool {
        let holds = self.guards.iter().all(|guard| match guard {
            Guard::Equals(key, value) => map.get(key) == Some(value),
            Guard::Absent(key) => !map.contains_key(key),
        });
        if !holds {
            return false;
        }
        for write in &self.writes {
            match write {
                Write::Set(key, value) => {
                    map.insert(key.clone(), value.clone());
                }
                Write::Delete(key) => {
                    map.remove(key);
                }
            }
        }
        true
    }
}

/// Transactional key/value store consumed by the lifecycle.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Liveness check performed at startup.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read several keys at once. Backends that can should answer from a
    /// single point-in-time view.
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Unconditional overwrite.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Apply `txn` atomically. `Ok(false)` means a guard failed and nothing
    /// was written.
    async fn commit(&self, txn: Transaction) -> Result<bool, StoreError>;

    /// Set `key` to `value` only if it currently holds `expected`
    /// (`None` = absent).
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        self.commit(Transaction::new().expect(key, expected).set(key, value))
            .await
    }
}

/// Which backend to open at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map, lost on exit.
    Memory,
    /// JSON document on disk.
    File { path: PathBuf },
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::File {
            path: PathBuf::from("keyhouse-state.json"),
        }
    }
}

impl StoreBackend {
    /// Construct the selected backend. Called once at startup.
    pub fn open(&self) -> Result<Arc<dyn StateStore>, StoreError> {
        let store: Arc<dyn StateStore> = match self {
            StoreBackend::Memory => Arc::new(MemoryStateStore::new()),
            StoreBackend::File { path } => Arc::new(FileStateStore::open(path.clone())?),
        };
        Ok(store)
    }

    pub fn describe(&self) -> String {
        match self {
            StoreBackend::Memory => "memory".to_string(),
            StoreBackend::File { path } => format!("file:{}", path.display()),
        }
    }
}
