//! In-process store backed by a locked `BTreeMap`.
//!
//! Every handle owns its own map, so state lives only as long as the
//! process. Used by tests and by embedders that share one `Arc` handle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{StateStore, Transaction};

/// Process-local store. Every call is atomic under a single lock.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.entries.read().map(|_| ()).map_err(|_| Self::poisoned())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(key);
        Ok(())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn commit(&self, txn: Transaction) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(txn.apply_to(&mut entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_and_set_respects_expected_value() {
        let store = MemoryStateStore::new();
        assert!(store.compare_and_set("k", None, "1").await.unwrap());
        assert!(!store.compare_and_set("k", None, "2").await.unwrap());
        assert!(!store.compare_and_set("k", Some("0"), "2").await.unwrap());
        assert!(store.compare_and_set("k", Some("1"), "2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn prefix_listing_only_returns_matching_keys() {
        let store = MemoryStateStore::new();
        store.set("share:a", "false").await.unwrap();
        store.set("share:b", "true").await.unwrap();
        store.set("shared", "x").await.unwrap();
        store.set("vault-state", "locked").await.unwrap();

        let keys = store.list_keys_with_prefix("share:").await.unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["share:a".to_string(), "share:b".to_string()]
        );
    }
}
