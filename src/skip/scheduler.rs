use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    models::AdSegment,
    playback::{PlaybackSurface, SeekOrigin, SeekTracker},
    share::format_range,
    store::DEFAULT_SKIP_PERCENTAGE,
    utils::LogThrottle,
};

use super::{
    markers::{layout_markers, MarkerSink},
    window::{find_trigger, marker_click_target},
};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info, log_warn};

/// Marker layout is refreshed every this many skip ticks.
const MARKER_REFRESH_TICKS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipSettings {
    pub enabled: bool,
    pub percentage: f64,
}

impl Default for SkipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            percentage: DEFAULT_SKIP_PERCENTAGE,
        }
    }
}

#[derive(Clone)]
struct SkipPlan {
    segments: Arc<Vec<AdSegment>>,
    surface: Arc<dyn PlaybackSurface>,
    markers: Option<Arc<dyn MarkerSink>>,
}

/// One tick of the skip check. Seeks past the first segment whose trigger
/// window holds the playhead and returns it.
pub fn check_and_skip(
    segments: &[AdSegment],
    surface: &dyn PlaybackSurface,
    settings: &SkipSettings,
    seeks: &SeekTracker,
) -> Option<AdSegment> {
    if !settings.enabled || surface.is_paused() || surface.is_ended() {
        return None;
    }

    let position = surface.current_time();
    let segment = *find_trigger(segments, position, settings.percentage)?;

    seeks.mark_engine_seek();
    surface.seek(segment.end);
    Some(segment)
}

/// Owns the polling task that enforces skips for the active video.
///
/// At most one loop runs at a time; `start` replaces any previous one.
pub struct SkipScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    plan: Option<SkipPlan>,
    seeks: Arc<SeekTracker>,
    poll_interval: Duration,
}

impl SkipScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            handle: None,
            cancel_token: None,
            plan: None,
            seeks: Arc::new(SeekTracker::new()),
            poll_interval,
        }
    }

    pub async fn start(
        &mut self,
        segments: Vec<AdSegment>,
        surface: Arc<dyn PlaybackSurface>,
        markers: Option<Arc<dyn MarkerSink>>,
        settings: watch::Receiver<SkipSettings>,
    ) -> Result<()> {
        self.stop().await?;

        if segments.is_empty() {
            return Ok(());
        }

        let plan = SkipPlan {
            segments: Arc::new(segments),
            surface,
            markers,
        };

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(skip_loop(
            plan.clone(),
            settings,
            self.seeks.clone(),
            self.poll_interval,
            cancel_token.clone(),
        ));

        log_info!("skip loop started for {} segment(s)", plan.segments.len());

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.plan = Some(plan);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.plan = None;

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("skip loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn segments(&self) -> Vec<AdSegment> {
        self.plan
            .as_ref()
            .map(|plan| plan.segments.as_ref().clone())
            .unwrap_or_default()
    }

    /// Host hook for the player's "seeking" notification.
    pub fn on_seeking(&self) -> SeekOrigin {
        let origin = self.seeks.classify();
        if origin == SeekOrigin::User {
            log_debug!("user seek observed");
        }
        origin
    }

    /// Host hook for a click on the marker of segment `index`. Works whether
    /// or not automatic skipping is enabled.
    pub fn handle_marker_click(&self, index: usize, clicked_at: f64) -> bool {
        let Some(plan) = self.plan.as_ref() else {
            return false;
        };
        let Some(segment) = plan.segments.get(index) else {
            log_warn!("marker click for unknown segment #{index}");
            return false;
        };

        let position = plan.surface.current_time();
        match marker_click_target(segment, position, clicked_at) {
            Some(target) => {
                self.seeks.mark_engine_seek();
                plan.surface.seek(target);
                log_info!("marker click skipped {}", format_range(segment));
                true
            }
            None => false,
        }
    }
}

async fn skip_loop(
    plan: SkipPlan,
    settings: watch::Receiver<SkipSettings>,
    seeks: Arc<SeekTracker>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut throttle = LogThrottle::default();
    let mut ticks: u32 = 0;
    let mut rendered_for: Option<(u64, u64)> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = *settings.borrow();

                if let Some(segment) = check_and_skip(&plan.segments, plan.surface.as_ref(), &current, &seeks) {
                    if throttle.should_log(&format!("skip:{}", segment.start)) {
                        log_info!("skipped ad {}", format_range(&segment));
                    }
                }

                if ticks % MARKER_REFRESH_TICKS == 0 {
                    refresh_markers(&plan, current.percentage, &mut rendered_for);
                }
                ticks = ticks.wrapping_add(1);
            }
            _ = cancel_token.cancelled() => {
                if let Some(sink) = plan.markers.as_ref() {
                    sink.clear();
                }
                log_info!("skip loop shutting down");
                break;
            }
        }
    }
}

fn refresh_markers(plan: &SkipPlan, percentage: f64, rendered_for: &mut Option<(u64, u64)>) {
    let Some(sink) = plan.markers.as_ref() else {
        return;
    };
    let Some(duration) = plan.surface.duration() else {
        return;
    };

    let signature = (duration.to_bits(), percentage.to_bits());
    if *rendered_for == Some(signature) {
        return;
    }

    sink.render(&layout_markers(&plan.segments, duration, percentage));
    *rendered_for = Some(signature);
}
