use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::VideoIdentifier;

/// A half-open advertisement interval `[start, end)` in seconds of playback.
///
/// Persisted as `start_time`/`end_time`; the detection service answers with
/// `start`/`end`, accepted through the aliases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdSegment {
    #[serde(rename = "start_time", alias = "start")]
    pub start: f64,
    #[serde(rename = "end_time", alias = "end")]
    pub end: f64,
}

impl AdSegment {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        let segment = Self { start, end };
        if !segment.is_valid() {
            bail!("invalid ad segment {start}-{end}");
        }
        Ok(segment)
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start >= 0.0 && self.end > self.start
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    pub fn overlaps(&self, other: &AdSegment) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoInfo {
    pub title: String,
    pub uploader: String,
}

impl VideoInfo {
    pub fn new(title: impl Into<String>, uploader: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uploader: uploader.into(),
        }
    }
}

/// One persisted set of segments for a video, as listed back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampRecord {
    pub video_id: VideoIdentifier,
    pub segments: Vec<AdSegment>,
    pub video_info: VideoInfo,
    pub saved_at: DateTime<Utc>,
}
