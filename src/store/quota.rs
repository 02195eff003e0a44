use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::identity::VideoIdentifier;

use super::{
    keys,
    kv::{read_json, write_json, KvStore},
};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Default, Serialize, Deserialize)]
struct FailedVideos {
    date: String,
    videos: Vec<String>,
}

/// The detection service's daily allowance, as observed by this client.
///
/// Videos refused because of exhaustion are remembered for the rest of the
/// local calendar day so they are not resubmitted.
#[derive(Clone)]
pub struct QuotaTracker {
    kv: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl QuotaTracker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub async fn mark_exhausted(&self, id: &VideoIdentifier, today: NaiveDate) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.try_mark(id, today).await {
            Ok(()) => {
                log_warn!("detection quota exhausted on {today}; remembered {id}");
                true
            }
            Err(err) => {
                log_error!("failed to record quota exhaustion for {id}: {err:#}");
                false
            }
        }
    }

    async fn try_mark(&self, id: &VideoIdentifier, today: NaiveDate) -> Result<()> {
        let date = today.format(DATE_FORMAT).to_string();
        self.kv.set(keys::QUOTA_EXHAUSTED_DATE, &date).await?;

        let mut failed: FailedVideos = read_json(self.kv.as_ref(), keys::QUOTA_FAILED_VIDEOS)
            .await?
            .unwrap_or_default();
        if failed.date != date {
            failed = FailedVideos {
                date,
                videos: Vec::new(),
            };
        }

        let key = id.canonical_key();
        if !failed.videos.contains(&key) {
            failed.videos.push(key);
        }
        write_json(self.kv.as_ref(), keys::QUOTA_FAILED_VIDEOS, &failed).await
    }

    /// Whether `id` was refused for quota reasons on `today`.
    pub async fn is_failed(&self, id: &VideoIdentifier, today: NaiveDate) -> bool {
        let failed: Option<FailedVideos> =
            match read_json(self.kv.as_ref(), keys::QUOTA_FAILED_VIDEOS).await {
                Ok(failed) => failed,
                Err(err) => {
                    log_error!("failed to read quota cache: {err:#}");
                    return false;
                }
            };

        let key = id.canonical_key();
        failed.is_some_and(|failed| {
            parse_date(&failed.date) == Some(today) && failed.videos.contains(&key)
        })
    }

    pub async fn exhausted_on(&self) -> Option<NaiveDate> {
        match self.kv.get(keys::QUOTA_EXHAUSTED_DATE).await {
            Ok(raw) => raw.as_deref().and_then(parse_date),
            Err(err) => {
                log_error!("failed to read quota date: {err:#}");
                None
            }
        }
    }

    pub async fn is_exhausted(&self, today: NaiveDate) -> bool {
        self.exhausted_on().await == Some(today)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn failures_are_remembered_for_the_day_only() {
        let tracker = QuotaTracker::new(Arc::new(MemoryKvStore::new()));
        let id = VideoIdentifier::bv("BV1aa411c7mD").unwrap();
        let other = VideoIdentifier::bv("BV1bb411c7mD").unwrap();

        assert!(!tracker.is_failed(&id, day(1)).await);
        assert!(tracker.mark_exhausted(&id, day(1)).await);

        assert!(tracker.is_failed(&id, day(1)).await);
        assert!(!tracker.is_failed(&other, day(1)).await);
        assert!(!tracker.is_failed(&id, day(2)).await);
        assert!(tracker.is_exhausted(day(1)).await);
        assert!(!tracker.is_exhausted(day(2)).await);
    }

    #[tokio::test]
    async fn a_new_day_starts_a_fresh_failed_set() {
        let tracker = QuotaTracker::new(Arc::new(MemoryKvStore::new()));
        let id = VideoIdentifier::bv("BV1aa411c7mD").unwrap();
        let other = VideoIdentifier::bv("BV1bb411c7mD").unwrap();

        tracker.mark_exhausted(&id, day(1)).await;
        tracker.mark_exhausted(&other, day(2)).await;

        assert!(!tracker.is_failed(&id, day(2)).await);
        assert!(tracker.is_failed(&other, day(2)).await);
        assert_eq!(tracker.exhausted_on().await, Some(day(2)));
    }
}
