use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{identity::VideoIdentifier, remote::CaptionsInfo};

use super::state::{DetectionResult, StatusKind, StatusSnapshot};

/// Everything the engine knows about the video currently being watched.
///
/// A new `Session` (with a new `context_id`) replaces the old one on every
/// activation; work started for an older context checks the id before it
/// writes anything back.
#[derive(Debug, Clone)]
pub struct Session {
    pub context_id: Uuid,
    pub video_id: Option<VideoIdentifier>,
    pub result: DetectionResult,
    pub captions: Option<CaptionsInfo>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn begin(video_id: Option<VideoIdentifier>) -> Self {
        let now = Utc::now();
        Self {
            context_id: Uuid::new_v4(),
            video_id,
            result: DetectionResult::initial(),
            captions: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_current(&self, context_id: Uuid) -> bool {
        self.context_id == context_id
    }

    pub fn kind(&self) -> StatusKind {
        self.result.kind()
    }

    pub fn apply(&mut self, result: DetectionResult) {
        self.result = result;
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            context_id: self.context_id,
            video_id: self.video_id.clone(),
            result: self.result.clone(),
            updated_at: self.updated_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::begin(None)
    }
}
