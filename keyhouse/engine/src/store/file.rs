//! JSON-document store on local disk.
//!
//! The whole key space lives in one document. Mutations run load, guard
//! check and save while holding an exclusive advisory lock on a sibling
//! `.lock` file, so handles in separate processes serialise their
//! read-modify-write cycles. The new document is written to a temp file and
//! renamed over the original; readers never see a half-written document and
//! need no file lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{StateStore, Transaction};

pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Queues callers of this handle before they contend for the file lock.
    lock: Mutex<()>,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl FileStateStore {
    /// Bind to `path`. A missing document is treated as an empty store and
    /// created on first write; an existing one must parse.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let lock_path = sibling(&path, ".lock");
        let store = Self {
            path,
            lock_path,
            lock: Mutex::new(()),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let tmp = sibling(&self.path, ".tmp");
        let bytes = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(component = "file-store", path = %self.path.display(), keys = entries.len(), "document written");
        Ok(())
    }

    /// Load, mutate and persist under the file lock. `mutate` returns whether
    /// anything changed; unchanged documents are not rewritten.
    ///
    /// Nothing awaits while the file lock is held, so a holder on this
    /// runtime always finishes before another caller can block on it.
    async fn update<F>(&self, mutate: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send,
    {
        let _queued = self.lock.lock().await;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        let mut file_lock = fd_lock::RwLock::new(lock_file);
        let _held = file_lock.write()?;

        let mut entries = self.load()?;
        let changed = mutate(&mut entries);
        if changed {
            self.save(&entries)?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _queued = self.lock.lock().await;
        self.load().map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _queued = self.lock.lock().await;
        Ok(self.load()?.remove(key))
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let _queued = self.lock.lock().await;
        let entries = self.load()?;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
            .await
            .map(|_| ())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        let _queued = self.lock.lock().await;
        Ok(self
            .load()?
            .into_keys()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn commit(&self, txn: Transaction) -> Result<bool, StoreError> {
        self.update(|entries| txn.apply_to(entries)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::open(path.clone()).unwrap();
        store.set("vault-state", "locked").await.unwrap();
        assert!(store.compare_and_set("active-count", None, "0").await.unwrap());
        drop(store);

        let reopened = FileStateStore::open(path).unwrap();
        assert_eq!(
            reopened.get("vault-state").await.unwrap().as_deref(),
            Some("locked")
        );
        assert_eq!(
            reopened.get("active-count").await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn rejected_commit_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::open(path.clone()).unwrap();

        let txn = Transaction::new().expect("vault-state", Some("sealed")).set("x", "1");
        assert!(!store.commit(txn).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_handles_never_lose_increments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::open(path.clone())
            .unwrap()
            .set("counter", "0")
            .await
            .unwrap();

        // One handle per task behaves like one process per caller.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                tokio::spawn(async move {
                    let store = FileStateStore::open(path).unwrap();
                    for _ in 0..5 {
                        loop {
                            let current = store.get("counter").await.unwrap().unwrap();
                            let next = (current.parse::<u32>().unwrap() + 1).to_string();
                            if store
                                .compare_and_set("counter", Some(&current), &next)
                                .await
                                .unwrap()
                            {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let store = FileStateStore::open(path).unwrap();
        assert_eq!(store.get("counter").await.unwrap().as_deref(), Some("40"));
    }

    #[test]
    fn corrupt_document_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            FileStateStore::open(path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
