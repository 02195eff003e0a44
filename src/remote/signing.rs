use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::Value;

/// Signs detection requests so the service can reject forged or replayed
/// submissions.
///
/// The signed text is the compact JSON object `{clientVersion, timestamp,
/// videoId}` with keys in sorted order, followed by the shared secret; the
/// signature is its standard base64 encoding.
#[derive(Debug)]
pub struct RequestSigner {
    secret: String,
    last_timestamp: AtomicI64,
}

impl RequestSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            last_timestamp: AtomicI64::new(0),
        }
    }

    /// Epoch milliseconds, strictly increasing across calls on this signer.
    pub fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    pub fn sign(&self, video_id: &str, client_version: &str, timestamp: i64) -> String {
        let mut signed = canonical_payload(video_id, client_version, timestamp);
        signed.push_str(&self.secret);
        STANDARD.encode(signed.as_bytes())
    }
}

pub fn canonical_payload(video_id: &str, client_version: &str, timestamp: i64) -> String {
    let fields: BTreeMap<&str, Value> = BTreeMap::from([
        ("clientVersion", Value::from(client_version)),
        ("timestamp", Value::from(timestamp)),
        ("videoId", Value::from(video_id)),
    ]);
    // Serializing a map of plain JSON values cannot fail.
    serde_json::to_string(&fields).unwrap_or_default()
}
