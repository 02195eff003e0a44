use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{identity::VideoIdentifier, models::SafeListEntry};

use super::{
    keys,
    kv::{read_json, write_json, KvStore},
};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info};

/// Entries written by older clients are plain id strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(SafeListEntry),
    Id(String),
}

/// Videos confirmed to carry no advertisement.
///
/// The whole list lives under a single key, so mutations are serialized
/// through `write_lock` to keep read-modify-write cycles from interleaving.
#[derive(Clone)]
pub struct SafeList {
    kv: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl SafeList {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn entries(&self) -> Vec<SafeListEntry> {
        match self.try_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                log_error!("failed to read safe list: {err:#}");
                Vec::new()
            }
        }
    }

    async fn try_entries(&self) -> Result<Vec<SafeListEntry>> {
        let stored: Vec<StoredEntry> = read_json(self.kv.as_ref(), keys::SAFE_LIST)
            .await?
            .unwrap_or_default();
        let now = Utc::now();
        Ok(stored
            .into_iter()
            .map(|entry| match entry {
                StoredEntry::Full(entry) => entry,
                StoredEntry::Id(id) => SafeListEntry::new(id, now),
            })
            .collect())
    }

    pub async fn contains(&self, id: &VideoIdentifier) -> bool {
        let key = id.canonical_key();
        self.entries()
            .await
            .iter()
            .any(|entry| entry.no_ads && entry.video_id == key)
    }

    /// Records `id` as ad-free. Re-adding refreshes `updated_at`.
    pub async fn add(&self, id: &VideoIdentifier) -> bool {
        let _guard = self.write_lock.lock().await;
        let key = id.canonical_key();

        let result = async {
            let mut entries = self.try_entries().await?;
            let now = Utc::now();
            match entries.iter_mut().find(|entry| entry.video_id == key) {
                Some(entry) => {
                    entry.no_ads = true;
                    entry.updated_at = now;
                }
                None => entries.push(SafeListEntry::new(key.clone(), now)),
            }
            write_json(self.kv.as_ref(), keys::SAFE_LIST, &entries).await
        }
        .await;

        match result {
            Ok(()) => {
                log_info!("added {key} to safe list");
                true
            }
            Err(err) => {
                log_error!("failed to add {key} to safe list: {err:#}");
                false
            }
        }
    }

    pub async fn remove(&self, id: &VideoIdentifier) -> bool {
        let _guard = self.write_lock.lock().await;
        let key = id.canonical_key();

        let result = async {
            let mut entries = self.try_entries().await?;
            let before = entries.len();
            entries.retain(|entry| entry.video_id != key);
            if entries.len() == before {
                return Ok(false);
            }
            write_json(self.kv.as_ref(), keys::SAFE_LIST, &entries).await?;
            Ok::<_, anyhow::Error>(true)
        }
        .await;

        match result {
            Ok(removed) => removed,
            Err(err) => {
                log_error!("failed to remove {key} from safe list: {err:#}");
                false
            }
        }
    }
}
