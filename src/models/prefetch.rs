use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cached answer to "does this video have captions", keyed by upload id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchCacheEntry {
    pub has_subtitle: bool,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub checked_at: DateTime<Utc>,
}

impl PrefetchCacheEntry {
    pub fn new(has_subtitle: bool, checked_at: DateTime<Utc>) -> Self {
        Self {
            has_subtitle,
            checked_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.checked_at) < ttl
    }
}
