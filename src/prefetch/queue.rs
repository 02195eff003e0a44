use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use tokio::{sync::Notify, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    identity::{VideoIdentifier, VideoKind},
    models::PrefetchCacheEntry,
    remote::SubtitleProbe,
    store::{SafeList, TimestampStore},
};

use super::PrefetchCache;

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info, log_warn};

/// Listing-page badge that shows whether a video has captions.
pub trait BadgeTarget: Send + Sync {
    fn show_result(&self, video_id: &str, has_subtitle: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Answered from the cache without queueing.
    Cached(bool),
    /// Already probed, queued or running; the target was bound to it.
    Attached,
    Queued,
    /// Already read, or not an upload id.
    Skipped,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    enqueued: HashSet<String>,
    running: HashSet<String>,
    done: HashMap<String, bool>,
    targets: HashMap<String, Vec<Arc<dyn BadgeTarget>>>,
    read_ids: HashSet<String>,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

/// Runs subtitle probes for listing pages, at most `limit` at a time and
/// never two for the same id.
#[derive(Clone)]
pub struct PrefetchQueue {
    state: Arc<Mutex<QueueState>>,
    probe: Arc<dyn SubtitleProbe>,
    cache: Arc<PrefetchCache>,
    limit: usize,
    idle: Arc<Notify>,
}

impl PrefetchQueue {
    pub fn new(probe: Arc<dyn SubtitleProbe>, cache: Arc<PrefetchCache>, limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            probe,
            cache,
            limit: limit.max(1),
            idle: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cache(&self) -> &PrefetchCache {
        &self.cache
    }

    pub fn schedule(&self, bvid: &str, target: Arc<dyn BadgeTarget>) -> ScheduleOutcome {
        if !is_upload_id(bvid) {
            log_debug!("not probing {bvid}: not an upload id");
            return ScheduleOutcome::Skipped;
        }

        if let Some(entry) = self.cache.get(bvid, Utc::now()) {
            target.show_result(bvid, entry.has_subtitle);
            return ScheduleOutcome::Cached(entry.has_subtitle);
        }

        {
            let mut state = self.lock();
            if state.read_ids.contains(bvid) {
                return ScheduleOutcome::Skipped;
            }

            if let Some(&has_subtitle) = state.done.get(bvid) {
                drop(state);
                target.show_result(bvid, has_subtitle);
                return ScheduleOutcome::Attached;
            }

            state.targets.entry(bvid.to_string()).or_default().push(target);
            if state.enqueued.contains(bvid) || state.running.contains(bvid) {
                return ScheduleOutcome::Attached;
            }

            state.enqueued.insert(bvid.to_string());
            state.pending.push_back(bvid.to_string());
        }

        self.pump();
        ScheduleOutcome::Queued
    }

    /// Starts queued probes until `limit` are running.
    pub fn pump(&self) {
        let launch: Vec<String> = {
            let mut state = self.lock();
            let mut launch = Vec::new();
            while state.running.len() < self.limit {
                let Some(id) = state.pending.pop_front() else {
                    break;
                };
                state.enqueued.remove(&id);
                state.running.insert(id.clone());
                launch.push(id);
            }
            launch
        };

        for id in launch {
            let queue = self.clone();
            tokio::spawn(async move { queue.run_probe(id).await });
        }
    }

    async fn run_probe(&self, id: String) {
        let has_subtitle = match self.probe.has_subtitle(&id).await {
            Ok(has_subtitle) => Some(has_subtitle),
            Err(err) => {
                log_warn!("subtitle probe for {id} failed: {err}");
                None
            }
        };

        let targets = {
            let mut state = self.lock();
            state.running.remove(&id);
            match has_subtitle {
                Some(has_subtitle) => {
                    state.done.insert(id.clone(), has_subtitle);
                    state.targets.remove(&id).unwrap_or_default()
                }
                // A later schedule can retry.
                None => {
                    state.targets.remove(&id);
                    Vec::new()
                }
            }
        };

        if let Some(has_subtitle) = has_subtitle {
            if self.cache.insert(&id, PrefetchCacheEntry::new(has_subtitle, Utc::now())) {
                self.flush().await;
            }
            for target in targets {
                target.show_result(&id, has_subtitle);
            }
        }

        self.pump();
        if self.lock().is_idle() {
            self.idle.notify_waiters();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn running(&self) -> usize {
        self.lock().running.len()
    }

    pub async fn flush(&self) {
        match self.cache.flush().await {
            Ok(0) => {}
            Ok(count) => log_debug!("subtitle cache flushed ({count} entries)"),
            Err(err) => log_warn!("subtitle cache flush failed: {err:#}"),
        }
    }

    /// Periodic flush. Flushes once more when cancelled.
    pub fn spawn_flush_timer(&self, every: Duration, cancel_token: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => queue.flush().await,
                    _ = cancel_token.cancelled() => {
                        queue.flush().await;
                        break;
                    }
                }
            }
        })
    }

    /// Marks uploads the viewer already has data for, so listings skip them.
    pub async fn refresh_read_marks(&self, timestamps: &TimestampStore, safelist: &SafeList) -> usize {
        let mut read: HashSet<String> = timestamps
            .list_all()
            .await
            .into_iter()
            .filter(|record| record.video_id.kind == VideoKind::Bv)
            .map(|record| record.video_id.base_key())
            .collect();
        read.extend(
            safelist
                .entries()
                .await
                .into_iter()
                .filter(|entry| entry.no_ads)
                .filter_map(|entry| VideoIdentifier::from_canonical(&entry.video_id))
                .filter(|id| id.kind == VideoKind::Bv)
                .map(|id| id.base_key()),
        );

        let count = read.len();
        self.lock().read_ids = read;
        log_info!("{count} upload(s) marked as read");
        count
    }

    pub fn read_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().read_ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

fn is_upload_id(bvid: &str) -> bool {
    VideoIdentifier::bv(bvid).is_some_and(|id| id.base_key() == bvid)
}
