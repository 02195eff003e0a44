use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::{
    models::PrefetchCacheEntry,
    store::{keys, read_json, write_json, KvStore},
};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_warn};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, PrefetchCacheEntry>,
    unflushed: usize,
}

/// Subtitle probe results keyed by upload id, kept in memory and written
/// back in batches.
pub struct PrefetchCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    flush_every: usize,
    state: Mutex<CacheState>,
}

impl PrefetchCache {
    /// Reads the persisted map, dropping entries older than `ttl`.
    pub async fn load(kv: Arc<dyn KvStore>, ttl: Duration, flush_every: usize) -> Self {
        let stored: HashMap<String, PrefetchCacheEntry> =
            match read_json(kv.as_ref(), keys::PREFETCH_CACHE).await {
                Ok(map) => map.unwrap_or_default(),
                Err(err) => {
                    log_warn!("discarding unreadable subtitle cache: {err:#}");
                    HashMap::new()
                }
            };

        let now = Utc::now();
        let entries: HashMap<_, _> = stored
            .into_iter()
            .filter(|(_, entry)| entry.is_fresh(now, ttl))
            .collect();
        log_debug!("subtitle cache loaded with {} fresh entr(ies)", entries.len());

        Self {
            kv,
            ttl,
            flush_every: flush_every.max(1),
            state: Mutex::new(CacheState {
                entries,
                unflushed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh entry for `bvid`; expired entries count as absent.
    pub fn get(&self, bvid: &str, now: DateTime<Utc>) -> Option<PrefetchCacheEntry> {
        self.lock()
            .entries
            .get(bvid)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .copied()
    }

    /// Records a result. Returns true once enough unsaved entries piled up
    /// that the caller should flush.
    pub fn insert(&self, bvid: &str, entry: PrefetchCacheEntry) -> bool {
        let mut state = self.lock();
        state.entries.insert(bvid.to_string(), entry);
        state.unflushed += 1;
        state.unflushed >= self.flush_every
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the fresh entries. No-op when nothing changed.
    pub async fn flush(&self) -> Result<usize> {
        let now = Utc::now();
        let snapshot: HashMap<String, PrefetchCacheEntry> = {
            let mut state = self.lock();
            if state.unflushed == 0 {
                return Ok(0);
            }
            let ttl = self.ttl;
            state.entries.retain(|_, entry| entry.is_fresh(now, ttl));
            state.unflushed = 0;
            state.entries.clone()
        };

        if let Err(err) = write_json(self.kv.as_ref(), keys::PREFETCH_CACHE, &snapshot).await {
            // Keep the batch marked dirty so the next flush retries it.
            self.lock().unflushed += snapshot.len().max(1);
            return Err(err);
        }
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn load_drops_expired_entries() {
        let kv = Arc::new(MemoryKvStore::new());
        let now = Utc::now().timestamp_millis();
        let stale = now - 2 * 3_600_000;
        kv.set(
            keys::PREFETCH_CACHE,
            &format!(
                r#"{{"BV1fresh":{{"hasSubtitle":true,"timestamp":{now}}},"BV1stale":{{"hasSubtitle":false,"timestamp":{stale}}}}}"#
            ),
        )
        .await
        .unwrap();

        let cache = PrefetchCache::load(kv, Duration::hours(1), 10).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("BV1fresh", Utc::now()).unwrap().has_subtitle);
        assert!(cache.get("BV1stale", Utc::now()).is_none());
    }

    #[tokio::test]
    async fn flushes_in_batches() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = PrefetchCache::load(kv.clone(), Duration::hours(1), 2).await;

        assert!(!cache.insert("BV1a", PrefetchCacheEntry::new(true, Utc::now())));
        assert!(cache.insert("BV1b", PrefetchCacheEntry::new(false, Utc::now())));
        assert_eq!(cache.flush().await.unwrap(), 2);
        assert_eq!(cache.flush().await.unwrap(), 0);

        let reloaded = PrefetchCache::load(kv, Duration::hours(1), 2).await;
        assert!(!reloaded.get("BV1b", Utc::now()).unwrap().has_subtitle);
    }

    #[tokio::test]
    async fn failed_flush_is_retried() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = PrefetchCache::load(kv.clone(), Duration::hours(1), 10).await;
        cache.insert("BV1a", PrefetchCacheEntry::new(true, Utc::now()));

        kv.set_failing(true);
        assert!(cache.flush().await.is_err());
        kv.set_failing(false);
        assert_eq!(cache.flush().await.unwrap(), 1);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let entry = PrefetchCacheEntry::new(true, Utc::now() - Duration::minutes(90));
        assert!(!entry.is_fresh(Utc::now(), Duration::hours(1)));
    }
}
