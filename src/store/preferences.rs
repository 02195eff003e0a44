use std::sync::Arc;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use super::{
    keys,
    kv::{read_json, write_json, KvStore},
};

const ENABLE_LOGS: bool = true;
use crate::log_warn;

pub const DEFAULT_SKIP_PERCENTAGE: f64 = 5.0;
pub const MIN_SKIP_PERCENTAGE: f64 = 1.0;
pub const MAX_SKIP_PERCENTAGE: f64 = 100.0;

/// User-facing switches, persisted next to the segment records so every
/// open page observes the same values.
#[derive(Clone)]
pub struct Preferences {
    kv: Arc<dyn KvStore>,
}

impl Preferences {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn read_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match read_json::<T>(self.kv.as_ref(), key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                log_warn!("preference {key} unreadable, using default: {err:#}");
                default
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        write_json(self.kv.as_ref(), key, value).await
    }

    /// Global auto-skip switch.
    pub async fn enabled(&self) -> bool {
        self.read_or(keys::PREF_ENABLED, true).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.write(keys::PREF_ENABLED, &enabled).await
    }

    /// Share of each segment, in percent, that triggers a skip.
    pub async fn skip_percentage(&self) -> f64 {
        clamp_percentage(self.read_or(keys::PREF_PERCENTAGE, DEFAULT_SKIP_PERCENTAGE).await)
    }

    pub async fn set_skip_percentage(&self, percentage: f64) -> Result<f64> {
        let clamped = clamp_percentage(percentage);
        self.write(keys::PREF_PERCENTAGE, &clamped).await?;
        Ok(clamped)
    }

    pub async fn debug_mode(&self) -> bool {
        self.read_or(keys::PREF_DEBUG_MODE, false).await
    }

    pub async fn set_debug_mode(&self, enabled: bool) -> Result<()> {
        self.write(keys::PREF_DEBUG_MODE, &enabled).await
    }

    /// Permission to submit videos to the detection service unprompted.
    pub async fn auto_detect_allowed(&self) -> bool {
        self.read_or(keys::PREF_AUTO_DETECT, true).await
    }

    pub async fn set_auto_detect_allowed(&self, allowed: bool) -> Result<()> {
        self.write(keys::PREF_AUTO_DETECT, &allowed).await
    }

    pub async fn search_precheck(&self) -> bool {
        self.read_or(keys::PREF_SEARCH_PRECHECK, true).await
    }

    pub async fn set_search_precheck(&self, enabled: bool) -> Result<()> {
        self.write(keys::PREF_SEARCH_PRECHECK, &enabled).await
    }
}

pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_SKIP_PERCENTAGE, MAX_SKIP_PERCENTAGE)
    } else {
        DEFAULT_SKIP_PERCENTAGE
    }
}
