use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{identity::VideoIdentifier, models::AdSegment};

/// Where the active video stands with respect to advertisement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AdStatus {
    NoSubtitle,
    NoAds,
    HasAds { segments: Vec<AdSegment> },
    Undetected,
    Detecting,
    /// Automatic detection is scheduled but has not started.
    Prepare,
    QuotaExhausted { date: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    NoSubtitle,
    NoAds,
    HasAds,
    Undetected,
    Detecting,
    Prepare,
    QuotaExhausted,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::NoSubtitle => "NO_SUBTITLE",
            StatusKind::NoAds => "NO_ADS",
            StatusKind::HasAds => "HAS_ADS",
            StatusKind::Undetected => "UNDETECTED",
            StatusKind::Detecting => "DETECTING",
            StatusKind::Prepare => "PREPARE",
            StatusKind::QuotaExhausted => "QUOTA_EXHAUSTED",
        }
    }
}

impl AdStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            AdStatus::NoSubtitle => StatusKind::NoSubtitle,
            AdStatus::NoAds => StatusKind::NoAds,
            AdStatus::HasAds { .. } => StatusKind::HasAds,
            AdStatus::Undetected => StatusKind::Undetected,
            AdStatus::Detecting => StatusKind::Detecting,
            AdStatus::Prepare => StatusKind::Prepare,
            AdStatus::QuotaExhausted { .. } => StatusKind::QuotaExhausted,
        }
    }

    pub fn segments(&self) -> &[AdSegment] {
        match self {
            AdStatus::HasAds { segments } => segments,
            _ => &[],
        }
    }
}

/// What produced the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusSource {
    /// Fresh context, nothing evaluated yet.
    Activation,
    Url,
    UrlNoAds,
    Storage,
    SafeList,
    QuotaCache,
    NoCaptions,
    MultiPart,
    Precheck,
    AutoDetect,
    ManualDetect,
    UserInput,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Activation => "activation",
            StatusSource::Url => "url",
            StatusSource::UrlNoAds => "url_no_ads",
            StatusSource::Storage => "storage",
            StatusSource::SafeList => "safe_list",
            StatusSource::QuotaCache => "quota_cache",
            StatusSource::NoCaptions => "no_captions",
            StatusSource::MultiPart => "multi_part",
            StatusSource::Precheck => "precheck",
            StatusSource::AutoDetect => "auto_detect",
            StatusSource::ManualDetect => "manual_detect",
            StatusSource::UserInput => "user_input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub status: AdStatus,
    pub source: StatusSource,
}

impl DetectionResult {
    pub fn new(status: AdStatus, source: StatusSource) -> Self {
        Self { status, source }
    }

    pub fn initial() -> Self {
        Self::new(AdStatus::Undetected, StatusSource::Activation)
    }

    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }
}

/// Published on every status change of the active context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub context_id: Uuid,
    pub video_id: Option<VideoIdentifier>,
    pub result: DetectionResult,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn kind(&self) -> StatusKind {
        self.result.kind()
    }
}
