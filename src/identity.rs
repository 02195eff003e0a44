//! Resolves the canonical video identifier from a page location.
//!
//! Resolution is total: malformed or unrelated locations resolve to `None`
//! rather than an error. Precedence, first match wins:
//!
//! 1. list-mode pages carrying `bvid` / `aid` query parameters
//! 2. `/bangumi/play/ep<n>` or `/bangumi/play/ss<n>` path segments
//! 3. `/video/BV...` path segment, with `p=<n>` selecting a part
//! 4. `aid`, `ss_id`, `ep_id` query parameters

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use url::Url;

const PART_SEPARATOR: &str = "_p";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum VideoKind {
    /// Alphanumeric upload id (`BV1xx411c7mD`).
    Bv,
    /// Numeric episode id of a series.
    Ep,
    /// Legacy numeric upload id.
    Av,
    /// Numeric season id of a series.
    Ss,
}

impl VideoKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            VideoKind::Bv => "BV",
            VideoKind::Ep => "ep",
            VideoKind::Av => "av",
            VideoKind::Ss => "ss",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoKind::Bv => "bv",
            VideoKind::Ep => "ep",
            VideoKind::Av => "av",
            VideoKind::Ss => "ss",
        }
    }

    fn accepts(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self {
            VideoKind::Bv => value.chars().all(|c| c.is_ascii_alphanumeric()),
            _ => value.chars().all(|c| c.is_ascii_digit()),
        }
    }
}

/// Stable key naming a single playable video.
///
/// `value` holds the id without its kind prefix. A missing `part_index`
/// is the same video as part 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoIdentifier {
    pub kind: VideoKind,
    pub value: String,
    pub part_index: Option<u32>,
}

impl VideoIdentifier {
    pub fn new(kind: VideoKind, value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if !kind.accepts(&value) {
            return None;
        }
        Some(Self {
            kind,
            value,
            part_index: None,
        })
    }

    pub fn bv(value: &str) -> Option<Self> {
        let bare = value.strip_prefix("BV").unwrap_or(value);
        Self::new(VideoKind::Bv, bare)
    }

    pub fn with_part(mut self, part: u32) -> Self {
        self.part_index = if part > 1 { Some(part) } else { None };
        self
    }

    pub fn part(&self) -> u32 {
        self.part_index.unwrap_or(1)
    }

    pub fn is_multi_part(&self) -> bool {
        self.part() > 1
    }

    /// Id as the platform writes it, without any part suffix (`BV1xx`, `ep42`).
    pub fn base_key(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.value)
    }

    /// Storage key. Parts after the first get a `_p<n>` suffix so each part
    /// owns its own record.
    pub fn canonical_key(&self) -> String {
        if self.is_multi_part() {
            format!("{}{}{}", self.base_key(), PART_SEPARATOR, self.part())
        } else {
            self.base_key()
        }
    }

    /// Inverse of [`canonical_key`](Self::canonical_key).
    pub fn from_canonical(key: &str) -> Option<Self> {
        let (base, part) = match key.rsplit_once(PART_SEPARATOR) {
            Some((base, part)) => match part.parse::<u32>() {
                Ok(part) if part > 1 => (base, part),
                _ => (key, 1),
            },
            None => (key, 1),
        };

        let id = [VideoKind::Bv, VideoKind::Ep, VideoKind::Av, VideoKind::Ss]
            .into_iter()
            .find_map(|kind| {
                base.strip_prefix(kind.prefix())
                    .and_then(|rest| Self::new(kind, rest))
            })?;

        Some(id.with_part(part))
    }
}

impl PartialEq for VideoIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value && self.part() == other.part()
    }
}

impl Eq for VideoIdentifier {}

impl Hash for VideoIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value.hash(state);
        self.part().hash(state);
    }
}

impl fmt::Display for VideoIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

/// Where the viewer currently is: the path and query of the page, plus a flag
/// for playlist-style pages where the playing video is named by query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationContext {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub list_mode: bool,
}

impl NavigationContext {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let list_mode = is_list_path(&path);
        Self {
            path,
            query: Vec::new(),
            list_mode,
        }
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Builds a context from a full page URL. Returns `None` for strings that
    /// are not absolute URLs.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let path = url.path().to_string();
        Some(Self {
            list_mode: is_list_path(&path),
            path,
            query,
        })
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn part_param(&self) -> u32 {
        self.query_param("p")
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1)
    }
}

fn is_list_path(path: &str) -> bool {
    path.starts_with("/list/") || path.starts_with("/medialist/play/")
}

pub fn resolve(ctx: &NavigationContext) -> Option<VideoIdentifier> {
    if ctx.list_mode {
        if let Some(id) = from_list_params(ctx) {
            return Some(id);
        }
    }

    from_bangumi_path(&ctx.path)
        .or_else(|| from_video_path(ctx))
        .or_else(|| from_query(ctx))
}

fn from_list_params(ctx: &NavigationContext) -> Option<VideoIdentifier> {
    if let Some(id) = ctx.query_param("bvid").and_then(VideoIdentifier::bv) {
        return Some(id.with_part(ctx.part_param()));
    }
    ctx.query_param("aid")
        .and_then(|aid| VideoIdentifier::new(VideoKind::Av, aid))
        .map(|id| id.with_part(ctx.part_param()))
}

/// Returns the path segment that directly follows the consecutive `anchor`
/// segments, e.g. `ep42` for `["bangumi", "play"]` in `/bangumi/play/ep42`.
fn segments_after<'a>(path: &'a str, anchor: &[&str]) -> Option<&'a str> {
    let parts: Vec<&'a str> = path.split('/').filter(|s| !s.is_empty()).collect();
    parts
        .windows(anchor.len() + 1)
        .find(|window| window[..anchor.len()] == anchor[..])
        .map(|window| window[anchor.len()])
}

fn from_bangumi_path(path: &str) -> Option<VideoIdentifier> {
    let segment = segments_after(path, &["bangumi", "play"])?;
    if let Some(ep) = segment.strip_prefix("ep") {
        return VideoIdentifier::new(VideoKind::Ep, ep);
    }
    segment
        .strip_prefix("ss")
        .and_then(|ss| VideoIdentifier::new(VideoKind::Ss, ss))
}

fn from_video_path(ctx: &NavigationContext) -> Option<VideoIdentifier> {
    let segment = segments_after(&ctx.path, &["video"])?;
    if !segment.starts_with("BV") {
        return None;
    }
    VideoIdentifier::bv(segment).map(|id| id.with_part(ctx.part_param()))
}

fn from_query(ctx: &NavigationContext) -> Option<VideoIdentifier> {
    [
        ("aid", VideoKind::Av),
        ("ss_id", VideoKind::Ss),
        ("ep_id", VideoKind::Ep),
    ]
    .into_iter()
    .find_map(|(name, kind)| {
        ctx.query_param(name)
            .and_then(|value| VideoIdentifier::new(kind, value.trim()))
    })
}
