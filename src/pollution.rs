//! Guards against link-carried segments that were copied from another video.
//!
//! Segment lists arriving in a share link are only trusted if no *other*
//! stored video owns the exact same placement.

use crate::{
    identity::VideoIdentifier,
    models::{AdSegment, TimestampRecord},
    share::format_segments,
    store::TimestampStore,
};

const ENABLE_LOGS: bool = true;
use crate::log_warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    EmptyCandidate,
    NoConflict,
    MatchesOtherVideo(VideoIdentifier),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub accept: bool,
    pub reason: ValidationReason,
}

impl Validation {
    fn accept(reason: ValidationReason) -> Self {
        Self {
            accept: true,
            reason,
        }
    }

    fn reject(source: VideoIdentifier) -> Self {
        Self {
            accept: false,
            reason: ValidationReason::MatchesOtherVideo(source),
        }
    }
}

/// Pure check against an already loaded record set. A record for the
/// candidate itself never counts as pollution.
pub fn validate_against(
    candidate_id: &VideoIdentifier,
    candidate: &[AdSegment],
    records: &[TimestampRecord],
) -> Validation {
    if candidate.is_empty() {
        return Validation::accept(ValidationReason::EmptyCandidate);
    }

    let wanted = format_segments(candidate);
    records
        .iter()
        .filter(|record| &record.video_id != candidate_id)
        .find(|record| format_segments(&record.segments) == wanted)
        .map(|record| Validation::reject(record.video_id.clone()))
        .unwrap_or_else(|| Validation::accept(ValidationReason::NoConflict))
}

#[derive(Clone)]
pub struct PollutionValidator {
    store: TimestampStore,
}

impl PollutionValidator {
    pub fn new(store: TimestampStore) -> Self {
        Self { store }
    }

    pub async fn validate(&self, candidate_id: &VideoIdentifier, candidate: &[AdSegment]) -> Validation {
        if candidate.is_empty() {
            return Validation::accept(ValidationReason::EmptyCandidate);
        }

        let records = self.store.list_all().await;
        let verdict = validate_against(candidate_id, candidate, &records);
        if let ValidationReason::MatchesOtherVideo(source) = &verdict.reason {
            log_warn!(
                "link segments for {candidate_id} duplicate those stored for {source}; ignoring"
            );
        }
        verdict
    }
}
