//! Encoding of ad segments into shareable links (`?adskip=61-87,120-145`)
//! and back, plus human-readable range formatting.

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::{
    identity::{VideoIdentifier, VideoKind},
    models::AdSegment,
};

pub const LINK_PARAM: &str = "adskip";
/// Link value asserting the video carries no advertisement.
pub const NO_ADS_MARKER: &str = "NONE";

const SITE_ROOT: &str = "https://www.bilibili.com";

/// Decoded value of the link parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSegments {
    Absent,
    NoAds,
    Segments(Vec<AdSegment>),
    Invalid(String),
}

pub fn parse_link_param(raw: Option<&str>) -> LinkSegments {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return LinkSegments::Absent;
    };

    if raw.eq_ignore_ascii_case(NO_ADS_MARKER) {
        return LinkSegments::NoAds;
    }

    match parse_segments(raw) {
        Ok(segments) => LinkSegments::Segments(segments),
        Err(err) => LinkSegments::Invalid(format!("{err:#}")),
    }
}

/// Parses `start-end[,start-end...]`. Any malformed range fails the whole value.
pub fn parse_segments(raw: &str) -> Result<Vec<AdSegment>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| anyhow!("range '{part}' is missing '-'"))?;
            let start: f64 = start
                .trim()
                .parse()
                .with_context(|| format!("bad start in '{part}'"))?;
            let end: f64 = end
                .trim()
                .parse()
                .with_context(|| format!("bad end in '{part}'"))?;
            AdSegment::new(start, end)
        })
        .collect::<Result<Vec<_>>>()
        .and_then(|segments| {
            if segments.is_empty() {
                Err(anyhow!("no ranges in '{raw}'"))
            } else {
                Ok(segments)
            }
        })
}

/// Canonical text form of a segment list. Two lists describe the same
/// advertisement placement exactly when their canonical forms are equal.
pub fn format_segments(segments: &[AdSegment]) -> String {
    segments
        .iter()
        .map(|seg| format!("{}-{}", seg.start, seg.end))
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds a link to `id` that carries its ad segments, or the no-ads marker
/// when `segments` is empty.
pub fn share_url(id: &VideoIdentifier, segments: &[AdSegment]) -> Result<String> {
    let path = match id.kind {
        VideoKind::Bv | VideoKind::Av => format!("/video/{}", id.base_key()),
        VideoKind::Ep | VideoKind::Ss => format!("/bangumi/play/{}", id.base_key()),
    };

    let mut url = Url::parse(SITE_ROOT)?.join(&path)?;

    let encoded = if segments.is_empty() {
        NO_ADS_MARKER.to_string()
    } else {
        format_segments(segments)
    };

    let query = if id.is_multi_part() {
        format!("p={}&{LINK_PARAM}={encoded}", id.part())
    } else {
        format!("{LINK_PARAM}={encoded}")
    };
    url.set_query(Some(&query));

    Ok(url.into())
}

/// `m:ss` below an hour, `h:mm:ss` above.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

pub fn format_range(segment: &AdSegment) -> String {
    format!(
        "{}-{}",
        format_timestamp(segment.start),
        format_timestamp(segment.end)
    )
}
