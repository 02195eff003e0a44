use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;

use crate::db::Database;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification that `key` was written (`Some`) or removed (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub key: String,
    pub value: Option<String>,
}

/// Persistent string key-value storage shared by every component.
///
/// Writes are last-writer-wins per key. Every successful write or delete is
/// announced on the change channel.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_many(&self, keys: &[String]) -> Result<()>;
    /// Entries whose key starts with `prefix`, ordered by key.
    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
    fn subscribe(&self) -> broadcast::Receiver<KvChange>;
}

pub async fn read_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match kv.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize + ?Sized>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(key, &raw).await
}

/// SQLite-backed store living in the engine's data directory.
pub struct SqliteKvStore {
    db: Database,
    changes: broadcast::Sender<KvChange>,
}

impl SqliteKvStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self::with_database(Database::new(path)?))
    }

    pub fn with_database(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { db, changes }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn announce(&self, key: &str, value: Option<&str>) {
        // No receivers is fine.
        let _ = self.changes.send(KvChange {
            key: key.to_string(),
            value: value.map(str::to_string),
        });
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.db.kv_get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.kv_set(key, value).await?;
        self.announce(key, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.db.kv_delete(key).await? {
            self.announce(key, None);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.db.kv_delete_many(keys.to_vec()).await?;
        for key in keys {
            self.announce(key, None);
        }
        Ok(())
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .db
            .kv_rows_with_prefix(prefix)
            .await?
            .into_iter()
            .map(|row| (row.key, row.value))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

/// Process-local store for hosts without a data directory, and for tests.
/// `set_failing(true)` makes every call error, to exercise degraded paths.
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, String>>,
    failing: AtomicBool,
    changes: broadcast::Sender<KvChange>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            failing: AtomicBool::new(false),
            changes,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        Ok(())
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.lock().insert(key.to_string(), value.to_string());
        let _ = self.changes.send(KvChange {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        if self.lock().remove(key).is_some() {
            let _ = self.changes.send(KvChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.check()?;
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn KvStore) {
        let mut changes = store.subscribe();

        store.set("adskip_BV1", "[]").await.unwrap();
        store.set("adskip_ep2", "[]").await.unwrap();
        store.set("other", "x").await.unwrap();

        let keys: Vec<String> = store
            .entries_with_prefix("adskip_")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["adskip_BV1", "adskip_ep2"]);

        store.delete("adskip_BV1").await.unwrap();
        assert_eq!(store.get("adskip_BV1").await.unwrap(), None);

        let first = changes.recv().await.unwrap();
        assert_eq!(first.key, "adskip_BV1");
        assert_eq!(first.value.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn memory_store_behaves_like_a_kv_store() {
        exercise(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_behaves_like_a_kv_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path().join("adskip.db")).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn failing_memory_store_reports_errors() {
        let store = MemoryKvStore::new();
        store.set("k", "v").await.unwrap();
        store.set_failing(true);
        assert!(store.get("k").await.is_err());
        assert!(store.set("k", "w").await.is_err());
        store.set_failing(false);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
