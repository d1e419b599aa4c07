use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::lifecycle::Keyhouse;
use crate::store::{MemoryStateStore, StateStore, Transaction};

pub fn memory_keyhouse() -> (Keyhouse, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    (Keyhouse::new(store.clone(), 100), store)
}

/// Memory store that can be told to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStateStore,
    /// Fail every commit while set.
    pub fail_commits: AtomicBool,
    /// Fail reads and writes of every kind while set.
    pub offline: AtomicBool,
    /// Number of upcoming pings to fail.
    pub failing_pings: AtomicU32,
    pub pings: AtomicU32,
}

impl FlakyStore {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let pending = self.failing_pings.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_pings.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("ping timed out".into()));
        }
        self.check_online()?;
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        self.check_online()?;
        self.inner.get_many(keys).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.delete(key).await
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        self.check_online()?;
        self.inner.list_keys_with_prefix(prefix).await
    }

    async fn commit(&self, txn: Transaction) -> Result<bool, StoreError> {
        self.check_online()?;
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write timed out".into()));
        }
        self.inner.commit(txn).await
    }
}
