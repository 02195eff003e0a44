use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{identity::VideoIdentifier, models::AdSegment, settings::EngineConfig};

use super::{
    captions::CaptionsInfo,
    retry::{with_retry, RetryPolicy},
    signing::RequestSigner,
    RemoteError,
};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info, log_warn};

/// What gets submitted for one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest {
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    pub mid: Option<i64>,
    pub duration: f64,
    pub auto_detect: bool,
    /// Caption payload and metadata, forwarded untouched.
    pub video_data: Value,
}

impl DetectionRequest {
    pub fn from_captions(id: &VideoIdentifier, info: &CaptionsInfo, auto_detect: bool) -> Self {
        Self {
            video_id: id.canonical_key(),
            title: info.title.clone(),
            uploader: info.uploader.clone(),
            mid: info.uploader_mid,
            duration: info.duration,
            auto_detect,
            video_data: info.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Ads(Vec<AdSegment>),
    NoAds,
}

#[async_trait]
pub trait DetectionBackend: Send + Sync {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutcome, RemoteError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedBody<'a> {
    #[serde(flatten)]
    request: &'a DetectionRequest,
    client_version: &'a str,
    user: Option<Value>,
    timestamp: i64,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectionResponse {
    success: Option<bool>,
    #[serde(default)]
    has_ads: bool,
    #[serde(default)]
    ad_timestamps: Vec<AdSegment>,
    #[serde(default)]
    message: Option<String>,
}

fn mentions_quota(message: &str, markers: &[String]) -> bool {
    let lowered = message.to_lowercase();
    markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Maps a service reply body onto an outcome or a typed failure.
pub fn interpret_response(body: &str, quota_markers: &[String]) -> Result<DetectionOutcome, RemoteError> {
    let response: DetectionResponse = serde_json::from_str(body)
        .map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;

    let Some(success) = response.success else {
        return Err(RemoteError::InvalidResponse("missing success flag".into()));
    };

    if !success {
        let message = response.message.unwrap_or_else(|| "unknown reason".into());
        return Err(if mentions_quota(&message, quota_markers) {
            RemoteError::QuotaExhausted { message }
        } else {
            RemoteError::Rejected { message }
        });
    }

    if !response.has_ads {
        return Ok(DetectionOutcome::NoAds);
    }

    let segments: Vec<AdSegment> = response
        .ad_timestamps
        .into_iter()
        .filter(AdSegment::is_valid)
        .collect();
    if segments.is_empty() {
        return Err(RemoteError::InvalidResponse(
            "ads reported without usable timestamps".into(),
        ));
    }
    Ok(DetectionOutcome::Ads(segments))
}

/// Detection service reached over HTTPS with signed JSON requests.
pub struct HttpDetectionBackend {
    client: reqwest::Client,
    endpoint: Url,
    client_version: String,
    signer: RequestSigner,
    retry: RetryPolicy,
    quota_markers: Vec<String>,
}

impl HttpDetectionBackend {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build detection HTTP client")?;
        let endpoint = Url::parse(&config.backend_url)
            .with_context(|| format!("invalid backend url '{}'", config.backend_url))?;

        Ok(Self {
            client,
            endpoint,
            client_version: config.client_version.clone(),
            signer: RequestSigner::new(config.signing_secret.clone()),
            retry: config.retry_policy(),
            quota_markers: config.quota_markers.clone(),
        })
    }

    async fn send_once(&self, request: &DetectionRequest) -> Result<DetectionOutcome, RemoteError> {
        let timestamp = self.signer.next_timestamp();
        let body = SignedBody {
            request,
            client_version: &self.client_version,
            user: None,
            timestamp,
            signature: self
                .signer
                .sign(&request.video_id, &self.client_version, timestamp),
        };

        log_debug!("submitting {} for detection", request.video_id);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_client_error() && mentions_quota(&text, &self.quota_markers) {
            return Err(RemoteError::QuotaExhausted { message: text });
        }
        if !status.is_success() {
            log_warn!("detection service answered {status} for {}", request.video_id);
            return Err(RemoteError::ServerStatus {
                status: status.as_u16(),
            });
        }

        interpret_response(&text, &self.quota_markers)
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionBackend {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutcome, RemoteError> {
        let outcome =
            with_retry(self.retry, "detection request", move || self.send_once(request)).await?;
        match &outcome {
            DetectionOutcome::Ads(segments) => {
                log_info!("{} has {} ad segment(s)", request.video_id, segments.len())
            }
            DetectionOutcome::NoAds => log_info!("{} has no ads", request.video_id),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        EngineConfig::default().quota_markers
    }

    #[test]
    fn parses_ads_and_no_ads() {
        let ads = interpret_response(
            r#"{"success":true,"hasAds":true,"adTimestamps":[{"start":61,"end":87}],"message":"ok"}"#,
            &markers(),
        )
        .unwrap();
        assert_eq!(ads, DetectionOutcome::Ads(vec![AdSegment::new(61.0, 87.0).unwrap()]));

        let none = interpret_response(r#"{"success":true,"hasAds":false}"#, &markers()).unwrap();
        assert_eq!(none, DetectionOutcome::NoAds);
    }

    #[test]
    fn classifies_failures() {
        let quota = interpret_response(
            r#"{"success":false,"message":"今日次数已用完"}"#,
            &markers(),
        );
        assert!(matches!(quota, Err(RemoteError::QuotaExhausted { .. })));

        let rejected = interpret_response(r#"{"success":false,"message":"bad signature"}"#, &markers());
        assert!(matches!(rejected, Err(RemoteError::Rejected { .. })));

        let garbage = interpret_response("<html>", &markers());
        assert!(matches!(garbage, Err(RemoteError::InvalidResponse(_))));

        let missing = interpret_response(r#"{"hasAds":false}"#, &markers());
        assert!(matches!(missing, Err(RemoteError::InvalidResponse(_))));
    }

    #[test]
    fn ads_without_valid_ranges_are_invalid() {
        let result = interpret_response(
            r#"{"success":true,"hasAds":true,"adTimestamps":[{"start":90,"end":80}]}"#,
            &markers(),
        );
        assert!(matches!(result, Err(RemoteError::InvalidResponse(_))));
    }

    #[test]
    fn signed_body_flattens_request_fields() {
        let request = DetectionRequest {
            video_id: "BV1GJ411x7h7".into(),
            title: "t".into(),
            uploader: "u".into(),
            mid: Some(7),
            duration: 600.0,
            auto_detect: true,
            video_data: serde_json::json!({"subtitles": []}),
        };
        let body = SignedBody {
            request: &request,
            client_version: "1.0.0",
            user: None,
            timestamp: 5,
            signature: "sig".into(),
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["videoId"], "BV1GJ411x7h7");
        assert_eq!(value["autoDetect"], true);
        assert_eq!(value["clientVersion"], "1.0.0");
        assert_eq!(value["timestamp"], 5);
        assert!(value["user"].is_null());
    }
}
