use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A video confirmed to contain no advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeListEntry {
    pub video_id: String,
    #[serde(default = "default_no_ads")]
    pub no_ads: bool,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_no_ads() -> bool {
    true
}

impl SafeListEntry {
    pub fn new(video_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            video_id: video_id.into(),
            no_ads: true,
            added_at: now,
            updated_at: now,
        }
    }
}
