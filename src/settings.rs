use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::remote::RetryPolicy;

pub const DEFAULT_BACKEND_URL: &str = "https://izumihostpab.life:3000/api/detect";
pub const DEFAULT_CAPTIONS_API_BASE: &str = "https://api.bilibili.com";

/// Engine tunables. Every field has a default, so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend_url: String,
    pub signing_secret: String,
    pub client_version: String,
    pub captions_api_base: String,
    pub auto_detect_delay_ms: u64,
    pub min_auto_detect_duration_secs: f64,
    pub skip_poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub prefetch_concurrency: usize,
    pub prefetch_cache_ttl_secs: i64,
    pub prefetch_flush_every: usize,
    pub prefetch_flush_interval_ms: u64,
    /// Substrings marking a rejection as daily-quota exhaustion.
    pub quota_markers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.into(),
            signing_secret: "adskip_plugin_2024_secure_key".into(),
            client_version: "1.0.0".into(),
            captions_api_base: DEFAULT_CAPTIONS_API_BASE.into(),
            auto_detect_delay_ms: 10_000,
            min_auto_detect_duration_secs: 30.0,
            skip_poll_interval_ms: 500,
            request_timeout_ms: 15_000,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            prefetch_concurrency: 4,
            prefetch_cache_ttl_secs: 3_600,
            prefetch_flush_every: 10,
            prefetch_flush_interval_ms: 30_000,
            quota_markers: vec![
                "quota".into(),
                "次数".into(),
                "额度".into(),
                "limit exceeded".into(),
            ],
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn auto_detect_delay(&self) -> Duration {
        Duration::from_millis(self.auto_detect_delay_ms)
    }

    pub fn skip_poll_interval(&self) -> Duration {
        Duration::from_millis(self.skip_poll_interval_ms.max(1))
    }

    pub fn prefetch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.prefetch_flush_interval_ms.max(1))
    }

    pub fn prefetch_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.prefetch_cache_ttl_secs)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ADSKIP_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url.trim().to_string();
            }
        }
    }
}

/// Engine configuration persisted as pretty JSON next to the database.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data: EngineConfig = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            EngineConfig::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineConfig> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineConfig> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> EngineConfig {
        self.read().clone()
    }

    pub fn update(&self, config: EngineConfig) -> Result<()> {
        let mut guard = self.write();
        *guard = config;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let mut data: EngineConfig = serde_json::from_str(&contents)?;
        data.apply_env_overrides();
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &EngineConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
