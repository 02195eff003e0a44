//! Clients for the ad-detection service and the platform's metadata API.

mod backend;
mod captions;
mod error;
mod retry;
mod signing;

pub use backend::{
    interpret_response, DetectionBackend, DetectionOutcome, DetectionRequest, HttpDetectionBackend,
};
pub use captions::{BilibiliCaptionsClient, CaptionsInfo, CaptionsProvider, SubtitleProbe};
pub use error::RemoteError;
pub use retry::{with_retry, RetryPolicy};
pub use signing::{canonical_payload, RequestSigner};
