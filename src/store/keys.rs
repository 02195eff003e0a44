//! Key layout of the persistent key-value store.

use crate::identity::VideoIdentifier;

pub const KEY_PREFIX: &str = "adskip_";

pub const SAFE_LIST: &str = "adskip_video_whitelist";
pub const UPLOADER_SAFE_LIST: &str = "adskip_uploader_whitelist";
pub const QUOTA_EXHAUSTED_DATE: &str = "adskip_quota_exhausted_date";
pub const QUOTA_FAILED_VIDEOS: &str = "adskip_quota_failed_videos";
pub const PREFETCH_CACHE: &str = "adskip_search_subtitle_cache";
pub const ADMIN_AUTHORIZED: &str = "adskip_admin_authorized";

pub const PREF_ENABLED: &str = "adskip_enabled";
pub const PREF_PERCENTAGE: &str = "adskip_percentage";
pub const PREF_DEBUG_MODE: &str = "adskip_debug_mode";
pub const PREF_AUTO_DETECT: &str = "adskip_auto_detect";
pub const PREF_SEARCH_PRECHECK: &str = "adskip_search_precheck";

/// Keys sharing the `adskip_` prefix that never hold a timestamp record.
pub const RESERVED: &[&str] = &[
    SAFE_LIST,
    UPLOADER_SAFE_LIST,
    QUOTA_EXHAUSTED_DATE,
    QUOTA_FAILED_VIDEOS,
    PREFETCH_CACHE,
    ADMIN_AUTHORIZED,
    PREF_ENABLED,
    PREF_PERCENTAGE,
    PREF_DEBUG_MODE,
    PREF_AUTO_DETECT,
    PREF_SEARCH_PRECHECK,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

pub fn video_key(id: &VideoIdentifier) -> String {
    format!("{KEY_PREFIX}{}", id.canonical_key())
}

/// Recovers the video a record key belongs to. Reserved and foreign keys
/// yield `None`.
pub fn video_from_key(key: &str) -> Option<VideoIdentifier> {
    if is_reserved(key) {
        return None;
    }
    key.strip_prefix(KEY_PREFIX)
        .and_then(VideoIdentifier::from_canonical)
}
