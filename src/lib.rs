mod db;
pub mod identity;
pub mod models;
pub mod playback;
pub mod pollution;
pub mod prefetch;
pub mod remote;
pub mod settings;
pub mod share;
pub mod skip;
pub mod status;
pub mod store;
mod utils;

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use prefetch::{BadgeTarget, PrefetchCache, PrefetchQueue, ScheduleOutcome};
use remote::{
    BilibiliCaptionsClient, CaptionsProvider, DetectionBackend, HttpDetectionBackend, SubtitleProbe,
};
use settings::{EngineConfig, SettingsStore};
use status::{AdStatusController, ControllerDeps};
use store::{KvStore, SqliteKvStore};

pub use utils::{init_logging, LogThrottle};

/// The assembled engine: one status controller for the page's player and
/// one prefetch queue for its listings.
pub struct Engine {
    config: EngineConfig,
    controller: AdStatusController,
    prefetch: PrefetchQueue,
    flush_cancel: CancellationToken,
    flusher: JoinHandle<()>,
    preference_listener: JoinHandle<()>,
}

impl Engine {
    /// Opens (or creates) the engine's files under `data_dir` and wires the
    /// HTTP collaborators.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let config = settings.config();

        let kv = Arc::new(SqliteKvStore::open(data_dir.join("adskip.sqlite3"))?);
        let captions = Arc::new(BilibiliCaptionsClient::new(&config)?);
        let backend = Arc::new(HttpDetectionBackend::new(&config)?);

        log::info!("engine data in {}", data_dir.display());
        Ok(Self::assemble(kv, captions.clone(), backend, captions, config).await)
    }

    pub async fn assemble(
        kv: Arc<dyn KvStore>,
        captions: Arc<dyn CaptionsProvider>,
        backend: Arc<dyn DetectionBackend>,
        probe: Arc<dyn SubtitleProbe>,
        config: EngineConfig,
    ) -> Self {
        let controller = AdStatusController::new(
            ControllerDeps {
                kv: kv.clone(),
                captions,
                backend,
            },
            config.clone(),
        );
        controller.refresh_skip_settings().await;
        let preference_listener = controller.spawn_preference_listener();

        let cache = PrefetchCache::load(kv, config.prefetch_cache_ttl(), config.prefetch_flush_every).await;
        let prefetch = PrefetchQueue::new(probe, Arc::new(cache), config.prefetch_concurrency);
        prefetch
            .refresh_read_marks(controller.timestamps(), controller.safelist())
            .await;

        let flush_cancel = CancellationToken::new();
        let flusher = prefetch.spawn_flush_timer(config.prefetch_flush_interval(), flush_cancel.clone());

        Self {
            config,
            controller,
            prefetch,
            flush_cancel,
            flusher,
            preference_listener,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &AdStatusController {
        &self.controller
    }

    pub fn prefetch(&self) -> &PrefetchQueue {
        &self.prefetch
    }

    /// Queues a listing probe unless the viewer turned prechecks off.
    pub async fn schedule_prefetch(&self, bvid: &str, target: Arc<dyn BadgeTarget>) -> ScheduleOutcome {
        if !self.controller.preferences().search_precheck().await {
            return ScheduleOutcome::Skipped;
        }
        self.prefetch.schedule(bvid, target)
    }

    /// Stops background work and writes out pending cache entries.
    pub async fn shutdown(self) {
        self.controller.deactivate().await;
        self.preference_listener.abort();
        self.flush_cancel.cancel();
        if let Err(err) = self.flusher.await {
            log::warn!("cache flusher ended abnormally: {err}");
        }
        log::info!("engine stopped");
    }
}
