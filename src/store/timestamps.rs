use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::helpers::from_epoch_ms,
    identity::VideoIdentifier,
    models::{AdSegment, TimestampRecord, VideoInfo},
};

use super::{
    keys::{self, KEY_PREFIX},
    kv::{write_json, KvStore},
};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredTimestamps {
    timestamps: Vec<AdSegment>,
    #[serde(rename = "videoInfo", default)]
    video_info: VideoInfo,
    #[serde(rename = "savedAt", default)]
    saved_at: i64,
}

/// Older records hold a bare segment array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Record(StoredTimestamps),
    Bare(Vec<AdSegment>),
}

impl StoredValue {
    fn into_record(self) -> StoredTimestamps {
        match self {
            StoredValue::Record(record) => record,
            StoredValue::Bare(timestamps) => StoredTimestamps {
                timestamps,
                video_info: VideoInfo::default(),
                saved_at: 0,
            },
        }
    }
}

/// Per-video ad segment records.
///
/// Storage failures never escape: reads degrade to "nothing stored" and
/// writes report `false`.
#[derive(Clone)]
pub struct TimestampStore {
    kv: Arc<dyn KvStore>,
}

impl TimestampStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persists `segments` as the current record for `id`. Empty or invalid
    /// segment lists are refused.
    pub async fn save(&self, id: &VideoIdentifier, segments: &[AdSegment], info: &VideoInfo) -> bool {
        if segments.is_empty() || segments.iter().any(|seg| !seg.is_valid()) {
            log_warn!("refusing to store empty or invalid segments for {id}");
            return false;
        }

        let record = StoredTimestamps {
            timestamps: segments.to_vec(),
            video_info: info.clone(),
            saved_at: Utc::now().timestamp_millis(),
        };

        match write_json(self.kv.as_ref(), &keys::video_key(id), &record).await {
            Ok(()) => {
                log_info!("stored {} ad segment(s) for {id}", segments.len());
                true
            }
            Err(err) => {
                log_error!("failed to store segments for {id}: {err:#}");
                false
            }
        }
    }

    pub async fn load(&self, id: &VideoIdentifier) -> Vec<AdSegment> {
        self.load_record(id)
            .await
            .map(|record| record.segments)
            .unwrap_or_default()
    }

    pub async fn load_record(&self, id: &VideoIdentifier) -> Option<TimestampRecord> {
        let key = keys::video_key(id);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => decode(id.clone(), &raw),
            Ok(None) => None,
            Err(err) => {
                log_error!("failed to read segments for {id}: {err:#}");
                None
            }
        }
    }

    /// Every stored record, skipping reserved keys and unreadable entries.
    pub async fn list_all(&self) -> Vec<TimestampRecord> {
        match self.try_list_all().await {
            Ok(records) => records,
            Err(err) => {
                log_error!("failed to enumerate stored segments: {err:#}");
                Vec::new()
            }
        }
    }

    async fn try_list_all(&self) -> Result<Vec<TimestampRecord>> {
        let entries = self.kv.entries_with_prefix(KEY_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, raw)| {
                let id = keys::video_from_key(&key)?;
                decode(id, &raw)
            })
            .collect())
    }

    pub async fn delete(&self, id: &VideoIdentifier) -> bool {
        match self.kv.delete(&keys::video_key(id)).await {
            Ok(()) => true,
            Err(err) => {
                log_error!("failed to delete segments for {id}: {err:#}");
                false
            }
        }
    }

    /// Removes every record matching `predicate`; returns how many went.
    pub async fn delete_all<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TimestampRecord) -> bool,
    {
        let doomed: Vec<String> = self
            .list_all()
            .await
            .iter()
            .filter(|record| predicate(record))
            .map(|record| keys::video_key(&record.video_id))
            .collect();

        if doomed.is_empty() {
            return 0;
        }

        match self.kv.delete_many(&doomed).await {
            Ok(()) => doomed.len(),
            Err(err) => {
                log_error!("bulk delete of {} record(s) failed: {err:#}", doomed.len());
                0
            }
        }
    }

    /// Drops records saved more than `max_age` ago.
    pub async fn prune_older_than(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        self.delete_all(|record| record.saved_at < cutoff).await
    }
}

fn decode(video_id: VideoIdentifier, raw: &str) -> Option<TimestampRecord> {
    let stored = match serde_json::from_str::<StoredValue>(raw) {
        Ok(value) => value.into_record(),
        Err(err) => {
            log_warn!("ignoring unreadable record for {video_id}: {err}");
            return None;
        }
    };

    let segments: Vec<AdSegment> = stored
        .timestamps
        .into_iter()
        .filter(AdSegment::is_valid)
        .collect();
    if segments.is_empty() {
        return None;
    }

    let saved_at = from_epoch_ms(stored.saved_at, "savedAt").unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Some(TimestampRecord {
        video_id,
        segments,
        video_info: stored.video_info,
        saved_at,
    })
}
