use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    identity::{self, NavigationContext, VideoIdentifier},
    models::{AdSegment, VideoInfo},
    playback::{PlaybackSurface, SeekOrigin},
    pollution::PollutionValidator,
    remote::{CaptionsInfo, CaptionsProvider, DetectionBackend, DetectionOutcome, DetectionRequest, RemoteError},
    settings::EngineConfig,
    share::{self, LinkSegments},
    skip::{MarkerSink, SkipScheduler, SkipSettings},
    store::{keys, KvStore, Preferences, QuotaTracker, SafeList, TimestampStore},
    utils::logging,
};

use super::{AdStatus, DetectionResult, Session, StatusKind, StatusSnapshot, StatusSource};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info, log_warn};

const TRANSITION_CAPACITY: usize = 32;

/// Collaborators the controller talks to.
#[derive(Clone)]
pub struct ControllerDeps {
    pub kv: Arc<dyn KvStore>,
    pub captions: Arc<dyn CaptionsProvider>,
    pub backend: Arc<dyn DetectionBackend>,
}

#[derive(Clone)]
struct PlaybackBinding {
    surface: Arc<dyn PlaybackSurface>,
    markers: Option<Arc<dyn MarkerSink>>,
}

struct PendingDetection {
    context_id: Uuid,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the ad status of the one video being watched.
///
/// Every activation starts a new context; scheduled or in-flight work that
/// belongs to an older context is cancelled or its result dropped.
#[derive(Clone)]
pub struct AdStatusController {
    session: Arc<Mutex<Session>>,
    status_tx: Arc<watch::Sender<StatusSnapshot>>,
    transitions: broadcast::Sender<StatusSnapshot>,
    kv: Arc<dyn KvStore>,
    timestamps: TimestampStore,
    safelist: SafeList,
    quota: QuotaTracker,
    preferences: Preferences,
    validator: PollutionValidator,
    captions: Arc<dyn CaptionsProvider>,
    backend: Arc<dyn DetectionBackend>,
    playback: Arc<Mutex<Option<PlaybackBinding>>>,
    skip: Arc<Mutex<SkipScheduler>>,
    skip_settings: Arc<watch::Sender<SkipSettings>>,
    pending: Arc<Mutex<Option<PendingDetection>>>,
    config: Arc<EngineConfig>,
}

impl AdStatusController {
    pub fn new(deps: ControllerDeps, config: EngineConfig) -> Self {
        let session = Session::default();
        let (status_tx, _) = watch::channel(session.snapshot());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (skip_settings, _) = watch::channel(SkipSettings::default());
        let timestamps = TimestampStore::new(deps.kv.clone());

        Self {
            session: Arc::new(Mutex::new(session)),
            status_tx: Arc::new(status_tx),
            transitions,
            validator: PollutionValidator::new(timestamps.clone()),
            timestamps,
            safelist: SafeList::new(deps.kv.clone()),
            quota: QuotaTracker::new(deps.kv.clone()),
            preferences: Preferences::new(deps.kv.clone()),
            kv: deps.kv,
            captions: deps.captions,
            backend: deps.backend,
            playback: Arc::new(Mutex::new(None)),
            skip: Arc::new(Mutex::new(SkipScheduler::new(config.skip_poll_interval()))),
            skip_settings: Arc::new(skip_settings),
            pending: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        }
    }

    pub fn timestamps(&self) -> &TimestampStore {
        &self.timestamps
    }

    pub fn safelist(&self) -> &SafeList {
        &self.safelist
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Latest status of the active context.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// Follows the latest status; intermediate states may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Every status transition, in order.
    pub fn transitions(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.transitions.subscribe()
    }

    pub fn skip_settings(&self) -> SkipSettings {
        *self.skip_settings.borrow()
    }

    /// Binds the media element. Starts skipping at once if the active video
    /// already has segments.
    pub async fn attach_playback(
        &self,
        surface: Arc<dyn PlaybackSurface>,
        markers: Option<Arc<dyn MarkerSink>>,
    ) {
        *self.playback.lock().await = Some(PlaybackBinding { surface, markers });

        let (context_id, segments) = {
            let session = self.session.lock().await;
            (session.context_id, session.result.status.segments().to_vec())
        };
        if !segments.is_empty() {
            self.start_skipping(context_id, segments).await;
        }
    }

    pub async fn detach_playback(&self) {
        *self.playback.lock().await = None;
        self.stop_skipping().await;
    }

    /// Starts a fresh context for `nav` and evaluates it to a status.
    pub async fn activate(&self, nav: &NavigationContext) -> StatusSnapshot {
        let video_id = identity::resolve(nav);
        let context_id = self.reset_context(video_id.clone()).await;

        let Some(id) = video_id else {
            log_debug!("no video identifier in {}", nav.path);
            return self.snapshot();
        };

        self.refresh_skip_settings().await;

        let (result, captions) = self.evaluate(&id, nav).await;
        log_info!(
            "{id}: {} (source: {})",
            result.kind().as_str(),
            result.source.as_str()
        );
        self.apply_evaluation(context_id, result, captions).await;
        self.snapshot()
    }

    /// Re-activates only when `nav` resolves to a different video.
    pub async fn on_navigation(&self, nav: &NavigationContext) -> Option<StatusSnapshot> {
        let next = identity::resolve(nav);
        let current = self.session.lock().await.video_id.clone();
        if next.is_some() && next == current {
            return None;
        }
        Some(self.activate(nav).await)
    }

    pub async fn deactivate(&self) {
        self.reset_context(None).await;
    }

    /// Runs detection now. Only acts while the video is `UNDETECTED`.
    pub async fn trigger_manual_detection(&self) -> bool {
        let context_id = self.session.lock().await.context_id;
        let Some((id, cached)) = self
            .begin_detection(context_id, StatusKind::Undetected, StatusSource::ManualDetect)
            .await
        else {
            log_debug!(
                "manual detection ignored while {}",
                self.snapshot().kind().as_str()
            );
            return false;
        };

        self.cancel_auto_detect().await;

        let captions = match cached {
            Some(info) => info,
            None => match self.captions.lookup(&id).await {
                Ok(info) if info.has_captions && info.matches(&id) => info,
                Ok(_) => {
                    let result = DetectionResult::new(AdStatus::NoSubtitle, StatusSource::ManualDetect);
                    self.settle(context_id, result, None).await;
                    return true;
                }
                Err(err) => {
                    log_warn!("captions lookup for {id} failed: {err}");
                    let result = DetectionResult::new(AdStatus::Undetected, StatusSource::ManualDetect);
                    self.settle(context_id, result, None).await;
                    return true;
                }
            },
        };

        self.finish_detection(context_id, id, captions, StatusSource::ManualDetect)
            .await;
        true
    }

    /// Replaces the active video's segments with ones the viewer entered.
    /// An empty list clears the stored record.
    pub async fn apply_user_segments(&self, segments: Vec<AdSegment>) -> Result<StatusSnapshot> {
        let (context_id, id, info) = {
            let session = self.session.lock().await;
            let id = session
                .video_id
                .clone()
                .ok_or_else(|| anyhow!("no active video"))?;
            let info = session
                .captions
                .as_ref()
                .map(|captions| VideoInfo::new(&captions.title, &captions.uploader));
            (session.context_id, id, info)
        };

        if let Some(bad) = segments.iter().find(|segment| !segment.is_valid()) {
            return Err(anyhow!("invalid segment {}-{}", bad.start, bad.end));
        }

        self.cancel_auto_detect().await;

        let status = if segments.is_empty() {
            self.timestamps.delete(&id).await;
            self.safelist.remove(&id).await;
            self.stop_skipping().await;
            AdStatus::Undetected
        } else {
            let info = match info {
                Some(info) => info,
                None => self
                    .timestamps
                    .load_record(&id)
                    .await
                    .map(|record| record.video_info)
                    .unwrap_or_default(),
            };
            if !self.timestamps.save(&id, &segments, &info).await {
                return Err(anyhow!("failed to persist segments for {id}"));
            }
            self.safelist.remove(&id).await;
            AdStatus::HasAds { segments }
        };

        let result = DetectionResult::new(status, StatusSource::UserInput);
        self.settle(context_id, result, None).await;
        Ok(self.snapshot())
    }

    /// Link that carries the active video's segments, if there is a video.
    pub async fn share_link(&self) -> Option<String> {
        let session = self.session.lock().await;
        let id = session.video_id.as_ref()?;
        let segments: &[AdSegment] = match &session.result.status {
            AdStatus::NoAds => &[],
            AdStatus::HasAds { segments } => segments,
            _ => return None,
        };
        match share::share_url(id, segments) {
            Ok(url) => Some(url),
            Err(err) => {
                log_warn!("cannot build share link for {id}: {err:#}");
                None
            }
        }
    }

    /// Host hook for the player's "seeking" notification.
    pub async fn on_seeking(&self) -> SeekOrigin {
        self.skip.lock().await.on_seeking()
    }

    pub async fn handle_marker_click(&self, index: usize, clicked_at: f64) -> bool {
        self.skip.lock().await.handle_marker_click(index, clicked_at)
    }

    /// Re-reads the skip preferences and pushes them to the running loop.
    pub async fn refresh_skip_settings(&self) -> SkipSettings {
        let settings = SkipSettings {
            enabled: self.preferences.enabled().await,
            percentage: self.preferences.skip_percentage().await,
        };
        self.skip_settings.send_replace(settings);
        logging::set_debug_mode(self.preferences.debug_mode().await || logging::debug_from_env());
        settings
    }

    /// Applies preference changes written by other parts of the host.
    pub fn spawn_preference_listener(&self) -> JoinHandle<()> {
        let mut changes = self.kv.subscribe();
        let controller = self.clone();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if is_skip_preference(&change.key) => {
                        controller.refresh_skip_settings().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log_debug!("preference listener lagged by {missed} change(s)");
                        controller.refresh_skip_settings().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn has_pending_auto_detect(&self) -> bool {
        self.pending
            .lock()
            .await
            .as_ref()
            .is_some_and(|pending| !pending.handle.is_finished())
    }

    async fn reset_context(&self, video_id: Option<VideoIdentifier>) -> Uuid {
        self.cancel_auto_detect().await;
        self.stop_skipping().await;

        let mut session = self.session.lock().await;
        *session = Session::begin(video_id);
        self.publish(session.snapshot());
        session.context_id
    }

    /// Walks the resolution chain; the first step that decides wins.
    async fn evaluate(
        &self,
        id: &VideoIdentifier,
        nav: &NavigationContext,
    ) -> (DetectionResult, Option<CaptionsInfo>) {
        let decided = |status, source| (DetectionResult::new(status, source), None);

        if id.is_multi_part() {
            return decided(AdStatus::NoAds, StatusSource::MultiPart);
        }

        match share::parse_link_param(nav.query_param(share::LINK_PARAM)) {
            LinkSegments::NoAds => {
                self.safelist.add(id).await;
                return decided(AdStatus::NoAds, StatusSource::UrlNoAds);
            }
            LinkSegments::Segments(segments) => {
                if self.validator.validate(id, &segments).await.accept {
                    let info = self
                        .timestamps
                        .load_record(id)
                        .await
                        .map(|record| record.video_info)
                        .unwrap_or_default();
                    self.timestamps.save(id, &segments, &info).await;
                    return decided(AdStatus::HasAds { segments }, StatusSource::Url);
                }
            }
            LinkSegments::Invalid(reason) => {
                log_warn!("ignoring malformed link segments for {id}: {reason}");
            }
            LinkSegments::Absent => {}
        }

        let stored = self.timestamps.load(id).await;
        if !stored.is_empty() {
            return decided(AdStatus::HasAds { segments: stored }, StatusSource::Storage);
        }

        if self.safelist.contains(id).await {
            return decided(AdStatus::NoAds, StatusSource::SafeList);
        }

        let today = QuotaTracker::today();
        if self.quota.is_failed(id, today).await {
            return decided(AdStatus::QuotaExhausted { date: today }, StatusSource::QuotaCache);
        }

        let captions = match self.captions.lookup(id).await {
            Ok(info) if info.has_captions && info.matches(id) => info,
            Ok(info) => {
                log_debug!(
                    "{id}: captions unavailable (has_captions={}, fetched={})",
                    info.has_captions,
                    info.video_id
                );
                return decided(AdStatus::NoSubtitle, StatusSource::NoCaptions);
            }
            Err(err) => {
                log_warn!("captions lookup for {id} failed: {err}");
                return decided(AdStatus::NoSubtitle, StatusSource::NoCaptions);
            }
        };

        let auto_allowed = self.preferences.auto_detect_allowed().await;
        let status = if auto_allowed && captions.duration >= self.config.min_auto_detect_duration_secs {
            AdStatus::Prepare
        } else {
            AdStatus::Undetected
        };
        (DetectionResult::new(status, StatusSource::Precheck), Some(captions))
    }

    async fn apply_evaluation(
        &self,
        context_id: Uuid,
        result: DetectionResult,
        captions: Option<CaptionsInfo>,
    ) {
        if result.kind() != StatusKind::Prepare {
            self.settle(context_id, result, captions).await;
            return;
        }
        if self.apply(context_id, result, captions).await {
            self.schedule_auto_detect(context_id).await;
        }
    }

    /// Applies a status that needs no further scheduling, starting the skip
    /// loop when it carries segments. The detection task only comes back
    /// through here, never through `schedule_auto_detect`.
    async fn settle(&self, context_id: Uuid, result: DetectionResult, captions: Option<CaptionsInfo>) {
        let segments = result.status.segments().to_vec();
        if !self.apply(context_id, result, captions).await {
            log_debug!("dropping status for superseded context {context_id}");
            return;
        }
        if !segments.is_empty() {
            self.start_skipping(context_id, segments).await;
        }
    }

    /// Writes `result` into the session if `context_id` is still current.
    async fn apply(
        &self,
        context_id: Uuid,
        result: DetectionResult,
        captions: Option<CaptionsInfo>,
    ) -> bool {
        let mut session = self.session.lock().await;
        if !session.is_current(context_id) {
            return false;
        }
        session.apply(result);
        if captions.is_some() {
            session.captions = captions;
        }
        self.publish(session.snapshot());
        true
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        self.status_tx.send_replace(snapshot.clone());
        let _ = self.transitions.send(snapshot);
    }

    async fn is_current(&self, context_id: Uuid) -> bool {
        self.session.lock().await.is_current(context_id)
    }

    /// Moves the session from `from` to `DETECTING` in one step, so two
    /// triggers cannot both start a request.
    async fn begin_detection(
        &self,
        context_id: Uuid,
        from: StatusKind,
        source: StatusSource,
    ) -> Option<(VideoIdentifier, Option<CaptionsInfo>)> {
        let mut session = self.session.lock().await;
        if !session.is_current(context_id) || session.kind() != from {
            return None;
        }
        // Undetected with the activation source means evaluation is still running.
        if session.result.source == StatusSource::Activation {
            return None;
        }
        let id = session.video_id.clone()?;

        session.apply(DetectionResult::new(AdStatus::Detecting, source));
        self.publish(session.snapshot());
        Some((id, session.captions.clone()))
    }

    async fn finish_detection(
        &self,
        context_id: Uuid,
        id: VideoIdentifier,
        captions: CaptionsInfo,
        source: StatusSource,
    ) {
        let request = DetectionRequest::from_captions(&id, &captions, source == StatusSource::AutoDetect);
        let outcome = self.backend.detect(&request).await;

        if !self.is_current(context_id).await {
            log_info!("discarding detection result for {id}: video changed");
            return;
        }

        let status = match outcome {
            Ok(DetectionOutcome::Ads(segments)) => {
                let info = VideoInfo::new(&captions.title, &captions.uploader);
                if !self.timestamps.save(&id, &segments, &info).await {
                    log_warn!("detected segments for {id} were not persisted");
                }
                AdStatus::HasAds { segments }
            }
            Ok(DetectionOutcome::NoAds) => {
                self.safelist.add(&id).await;
                AdStatus::NoAds
            }
            Err(RemoteError::QuotaExhausted { message }) => {
                log_warn!("detection quota exhausted: {message}");
                let today = QuotaTracker::today();
                self.quota.mark_exhausted(&id, today).await;
                AdStatus::QuotaExhausted { date: today }
            }
            Err(err) => {
                log_warn!("detection for {id} failed: {err}");
                AdStatus::Undetected
            }
        };

        self.settle(context_id, DetectionResult::new(status, source), None)
            .await;
    }

    async fn schedule_auto_detect(&self, context_id: Uuid) {
        let delay = self.config.auto_detect_delay();
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let controller = self.clone();

        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.take() {
            previous.cancel_token.cancel();
        }

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log_debug!("auto-detect for context {context_id} cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            controller.run_auto_detect(context_id).await;
        });

        log_info!("auto-detect scheduled in {}ms", delay.as_millis());
        *pending = Some(PendingDetection {
            context_id,
            cancel_token,
            handle,
        });
    }

    async fn run_auto_detect(&self, context_id: Uuid) {
        let Some((id, captions)) = self
            .begin_detection(context_id, StatusKind::Prepare, StatusSource::AutoDetect)
            .await
        else {
            return;
        };
        let Some(captions) = captions else {
            log_warn!("auto-detect for {id} has no captions to send");
            let result = DetectionResult::new(AdStatus::Undetected, StatusSource::AutoDetect);
            self.settle(context_id, result, None).await;
            return;
        };
        self.finish_detection(context_id, id, captions, StatusSource::AutoDetect)
            .await;
    }

    /// Cancels the scheduled auto-detect. A request already on the wire
    /// runs to completion and is dropped by the context check.
    async fn cancel_auto_detect(&self) {
        if let Some(pending) = self.pending.lock().await.take() {
            if !pending.handle.is_finished() {
                log_debug!("cancelling auto-detect for context {}", pending.context_id);
            }
            pending.cancel_token.cancel();
        }
    }

    async fn start_skipping(&self, context_id: Uuid, segments: Vec<AdSegment>) {
        let Some(binding) = self.playback.lock().await.clone() else {
            log_debug!("no playback surface attached, skipping deferred");
            return;
        };

        let mut skip = self.skip.lock().await;
        if !self.is_current(context_id).await {
            return;
        }
        if let Err(err) = skip
            .start(
                segments,
                binding.surface,
                binding.markers,
                self.skip_settings.subscribe(),
            )
            .await
        {
            log_warn!("previous skip loop ended abnormally: {err:#}");
        }
    }

    async fn stop_skipping(&self) {
        if let Err(err) = self.skip.lock().await.stop().await {
            log_warn!("skip loop ended abnormally: {err:#}");
        }
    }
}

fn is_skip_preference(key: &str) -> bool {
    matches!(
        key,
        keys::PREF_ENABLED | keys::PREF_PERCENTAGE | keys::PREF_DEBUG_MODE
    )
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{playback::testing::FakePlayback, store::MemoryKvStore};

    struct ScriptedCaptions {
        info: StdMutex<Option<CaptionsInfo>>,
        calls: AtomicUsize,
    }

    impl ScriptedCaptions {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptionsProvider for ScriptedCaptions {
        async fn lookup(&self, _id: &VideoIdentifier) -> Result<CaptionsInfo, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.info
                .lock()
                .unwrap()
                .clone()
                .ok_or(RemoteError::Rejected {
                    message: "no such video".into(),
                })
        }
    }

    enum Script {
        Ads(Vec<AdSegment>),
        NoAds,
        Quota,
        Fail,
    }

    struct ScriptedBackend {
        script: Script,
        latency: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DetectionBackend for ScriptedBackend {
        async fn detect(&self, _request: &DetectionRequest) -> Result<DetectionOutcome, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match &self.script {
                Script::Ads(segments) => Ok(DetectionOutcome::Ads(segments.clone())),
                Script::NoAds => Ok(DetectionOutcome::NoAds),
                Script::Quota => Err(RemoteError::QuotaExhausted {
                    message: "daily quota used up".into(),
                }),
                Script::Fail => Err(RemoteError::ServerStatus { status: 502 }),
            }
        }
    }

    struct Harness {
        captions: Arc<ScriptedCaptions>,
        backend: Arc<ScriptedBackend>,
        controller: AdStatusController,
    }

    fn harness(captions: Option<CaptionsInfo>, script: Script) -> Harness {
        harness_with_latency(captions, script, Duration::ZERO)
    }

    fn harness_with_latency(captions: Option<CaptionsInfo>, script: Script, latency: Duration) -> Harness {
        let kv = Arc::new(MemoryKvStore::new());
        let captions = Arc::new(ScriptedCaptions {
            info: StdMutex::new(captions),
            calls: AtomicUsize::new(0),
        });
        let backend = Arc::new(ScriptedBackend {
            script,
            latency,
            calls: AtomicUsize::new(0),
        });
        let controller = AdStatusController::new(
            ControllerDeps {
                kv,
                captions: captions.clone(),
                backend: backend.clone(),
            },
            EngineConfig::default(),
        );
        Harness {
            captions,
            backend,
            controller,
        }
    }

    fn captioned(video_id: &str, duration: f64) -> CaptionsInfo {
        CaptionsInfo {
            video_id: video_id.into(),
            title: "Weekly review".into(),
            uploader: "someone".into(),
            uploader_mid: Some(42),
            duration,
            has_captions: true,
            payload: json!({ "subtitle_contents": [] }),
        }
    }

    fn nav(url: &str) -> NavigationContext {
        NavigationContext::from_url(url).unwrap()
    }

    fn seg(start: f64, end: f64) -> AdSegment {
        AdSegment::new(start, end).unwrap()
    }

    fn bv(raw: &str) -> VideoIdentifier {
        VideoIdentifier::bv(raw).unwrap()
    }

    #[tokio::test]
    async fn no_ads_link_settles_without_network() {
        let h = harness(None, Script::Fail);

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1xx411c7mD?adskip=NONE"))
            .await;

        assert_eq!(
            snapshot.result,
            DetectionResult::new(AdStatus::NoAds, StatusSource::UrlNoAds)
        );
        assert!(h.controller.safelist().contains(&bv("BV1xx411c7mD")).await);
        assert_eq!(h.captions.calls(), 0);
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn link_segments_copied_from_another_video_are_rejected() {
        let h = harness(None, Script::Fail);
        h.controller
            .timestamps()
            .save(&bv("BV1other11111"), &[seg(10.0, 20.0)], &VideoInfo::default())
            .await;

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1current111?adskip=10-20"))
            .await;

        assert_eq!(snapshot.kind(), StatusKind::NoSubtitle);
        assert!(h.controller.timestamps().load(&bv("BV1current111")).await.is_empty());
        assert_eq!(h.captions.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_link_falls_back_to_stored_segments() {
        let h = harness(None, Script::Fail);
        let current = bv("BV1current111");
        h.controller
            .timestamps()
            .save(&bv("BV1other11111"), &[seg(10.0, 20.0)], &VideoInfo::default())
            .await;
        h.controller
            .timestamps()
            .save(&current, &[seg(30.0, 40.0)], &VideoInfo::default())
            .await;

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1current111?adskip=10-20"))
            .await;

        assert_eq!(
            snapshot.result,
            DetectionResult::new(
                AdStatus::HasAds {
                    segments: vec![seg(30.0, 40.0)]
                },
                StatusSource::Storage
            )
        );
        assert_eq!(h.captions.calls(), 0);
    }

    #[tokio::test]
    async fn accepted_link_segments_are_persisted() {
        let h = harness(None, Script::Fail);

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1fresh11111?adskip=61-87.5"))
            .await;

        assert_eq!(snapshot.result.source, StatusSource::Url);
        assert_eq!(
            h.controller.timestamps().load(&bv("BV1fresh11111")).await,
            vec![seg(61.0, 87.5)]
        );
    }

    #[tokio::test]
    async fn malformed_link_segments_do_not_mark_the_video_safe() {
        let h = harness(None, Script::Fail);

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1fresh11111?adskip=20-10"))
            .await;

        assert_eq!(snapshot.kind(), StatusKind::NoSubtitle);
        assert!(!h.controller.safelist().contains(&bv("BV1fresh11111")).await);
    }

    #[tokio::test]
    async fn later_parts_are_treated_as_ad_free() {
        let h = harness(Some(captioned("BV1multi11111", 600.0)), Script::Fail);

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1multi11111?p=2"))
            .await;

        assert_eq!(
            snapshot.result,
            DetectionResult::new(AdStatus::NoAds, StatusSource::MultiPart)
        );
        assert_eq!(h.captions.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn captioned_video_detects_automatically_after_the_delay() {
        let h = harness(
            Some(captioned("BV1auto111111", 45.0)),
            Script::Ads(vec![seg(5.0, 15.0)]),
        );
        let player = Arc::new(FakePlayback::new(45.0));
        h.controller.attach_playback(player.clone(), None).await;
        let mut transitions = h.controller.transitions();
        let started = tokio::time::Instant::now();

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1auto111111"))
            .await;
        assert_eq!(snapshot.kind(), StatusKind::Prepare);

        let mut seen = Vec::new();
        let mut detecting_at = None;
        while let Ok(Ok(snapshot)) =
            tokio::time::timeout(Duration::from_secs(30), transitions.recv()).await
        {
            let kind = snapshot.kind();
            if kind == StatusKind::Detecting {
                detecting_at = Some(started.elapsed());
            }
            seen.push(kind);
            if kind == StatusKind::HasAds {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                StatusKind::Undetected,
                StatusKind::Prepare,
                StatusKind::Detecting,
                StatusKind::HasAds
            ]
        );
        assert!(detecting_at.unwrap() >= Duration::from_secs(10));
        assert_eq!(h.backend.calls(), 1);
        assert_eq!(
            h.controller.timestamps().load(&bv("BV1auto111111")).await,
            vec![seg(5.0, 15.0)]
        );

        player.set_time(5.2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(player.seeks(), vec![15.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_no_ads_verdict_marks_the_video_safe() {
        let h = harness(Some(captioned("BV1clean11111", 45.0)), Script::NoAds);
        let id = bv("BV1clean11111");
        let mut transitions = h.controller.transitions();

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1clean11111"))
            .await;
        assert_eq!(snapshot.kind(), StatusKind::Prepare);

        let mut seen = Vec::new();
        while let Ok(Ok(snapshot)) =
            tokio::time::timeout(Duration::from_secs(30), transitions.recv()).await
        {
            let kind = snapshot.kind();
            seen.push(kind);
            if kind == StatusKind::NoAds {
                assert_eq!(snapshot.result.source, StatusSource::AutoDetect);
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                StatusKind::Undetected,
                StatusKind::Prepare,
                StatusKind::Detecting,
                StatusKind::NoAds
            ]
        );
        assert_eq!(h.backend.calls(), 1);
        assert!(h.controller.safelist().contains(&id).await);
        assert!(h.controller.timestamps().load(&id).await.is_empty());
        let link = h.controller.share_link().await.unwrap();
        assert!(link.ends_with("adskip=NONE"), "{link}");
    }

    #[tokio::test]
    async fn undetected_videos_have_no_share_link() {
        let h = harness(Some(captioned("BV1short11111", 20.0)), Script::Fail);

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1short11111"))
            .await;

        assert_eq!(snapshot.kind(), StatusKind::Undetected);
        assert_eq!(h.controller.share_link().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn short_videos_wait_for_a_manual_trigger() {
        let h = harness(
            Some(captioned("BV1short11111", 20.0)),
            Script::Ads(vec![seg(2.0, 6.0)]),
        );

        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1short11111"))
            .await;
        assert_eq!(snapshot.kind(), StatusKind::Undetected);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.backend.calls(), 0);

        assert!(h.controller.trigger_manual_detection().await);
        assert_eq!(
            h.controller.snapshot().result,
            DetectionResult::new(
                AdStatus::HasAds {
                    segments: vec![seg(2.0, 6.0)]
                },
                StatusSource::ManualDetect
            )
        );
        assert!(!h.controller.trigger_manual_detection().await);
        assert_eq!(h.backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_is_cached_for_the_day() {
        let h = harness(Some(captioned("BV1quota11111", 600.0)), Script::Quota);
        let target = nav("https://www.bilibili.com/video/BV1quota11111");

        h.controller.activate(&target).await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        let today = QuotaTracker::today();
        assert_eq!(
            h.controller.snapshot().result,
            DetectionResult::new(AdStatus::QuotaExhausted { date: today }, StatusSource::AutoDetect)
        );
        assert_eq!(h.controller.quota().exhausted_on().await, Some(today));

        let again = h.controller.activate(&target).await;
        assert_eq!(
            again.result,
            DetectionResult::new(AdStatus::QuotaExhausted { date: today }, StatusSource::QuotaCache)
        );
        assert_eq!(h.backend.calls(), 1);
        assert_eq!(h.captions.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failures_fall_back_to_manual() {
        let h = harness(Some(captioned("BV1flaky11111", 600.0)), Script::Fail);

        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1flaky11111"))
            .await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(
            h.controller.snapshot().result,
            DetectionResult::new(AdStatus::Undetected, StatusSource::AutoDetect)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_cancels_the_scheduled_detection() {
        let h = harness(
            Some(captioned("BV1first11111", 600.0)),
            Script::Ads(vec![seg(1.0, 9.0)]),
        );

        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1first11111"))
            .await;
        assert!(h.controller.has_pending_auto_detect().await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1second1111"))
            .await;
        assert_eq!(snapshot.kind(), StatusKind::NoSubtitle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.backend.calls(), 0);
        assert!(!h.controller.has_pending_auto_detect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn late_detection_results_are_discarded() {
        let h = harness_with_latency(
            Some(captioned("BV1first11111", 600.0)),
            Script::Ads(vec![seg(1.0, 9.0)]),
            Duration::from_secs(5),
        );

        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1first11111"))
            .await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.controller.snapshot().kind(), StatusKind::Detecting);

        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1second1111"))
            .await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.video_id, Some(bv("BV1second1111")));
        assert_eq!(snapshot.kind(), StatusKind::NoSubtitle);
        assert_eq!(h.backend.calls(), 1);
        assert!(h.controller.timestamps().load(&bv("BV1first11111")).await.is_empty());
    }

    #[tokio::test]
    async fn same_video_navigation_is_ignored() {
        let h = harness(None, Script::Fail);
        let target = nav("https://www.bilibili.com/video/BV1same111111");

        assert!(h.controller.on_navigation(&target).await.is_some());
        let context = h.controller.snapshot().context_id;
        assert!(h.controller.on_navigation(&target).await.is_none());
        assert_eq!(h.controller.snapshot().context_id, context);

        assert!(h
            .controller
            .on_navigation(&nav("https://www.bilibili.com/video/BV1other11111"))
            .await
            .is_some());
        assert_ne!(h.controller.snapshot().context_id, context);
    }

    #[tokio::test]
    async fn user_segments_replace_the_status_and_share() {
        let h = harness(None, Script::Fail);
        let id = bv("BV1manual1111");
        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1manual1111?adskip=NONE"))
            .await;
        assert!(h.controller.safelist().contains(&id).await);

        let snapshot = h
            .controller
            .apply_user_segments(vec![seg(30.0, 45.0)])
            .await
            .unwrap();

        assert_eq!(snapshot.result.source, StatusSource::UserInput);
        assert_eq!(snapshot.result.status.segments(), &[seg(30.0, 45.0)]);
        assert!(!h.controller.safelist().contains(&id).await);
        let link = h.controller.share_link().await.unwrap();
        assert!(link.ends_with("adskip=30-45"), "{link}");

        let cleared = h.controller.apply_user_segments(Vec::new()).await.unwrap();
        assert_eq!(cleared.kind(), StatusKind::Undetected);
        assert!(h.controller.timestamps().load(&id).await.is_empty());
    }

    #[tokio::test]
    async fn clearing_segments_forgets_the_no_ads_mark() {
        let h = harness(None, Script::Fail);
        let id = bv("BV1manual1111");
        h.controller
            .activate(&nav("https://www.bilibili.com/video/BV1manual1111?adskip=NONE"))
            .await;
        assert!(h.controller.safelist().contains(&id).await);

        let cleared = h.controller.apply_user_segments(Vec::new()).await.unwrap();
        assert_eq!(cleared.kind(), StatusKind::Undetected);
        assert!(!h.controller.safelist().contains(&id).await);
        assert_eq!(h.controller.share_link().await, None);

        h.controller.deactivate().await;
        let revisit = h
            .controller
            .activate(&nav("https://www.bilibili.com/video/BV1manual1111"))
            .await;
        assert_eq!(revisit.kind(), StatusKind::NoSubtitle);
    }

    #[tokio::test]
    async fn user_segments_need_an_active_video() {
        let h = harness(None, Script::Fail);
        assert!(h
            .controller
            .apply_user_segments(vec![seg(1.0, 2.0)])
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn preference_changes_reach_the_skip_loop() {
        let h = harness(None, Script::Fail);
        let listener = h.controller.spawn_preference_listener();
        assert!(h.controller.skip_settings().enabled);

        h.controller.preferences().set_enabled(false).await.unwrap();
        h.controller.preferences().set_skip_percentage(20.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let settings = h.controller.skip_settings();
        assert!(!settings.enabled);
        assert_eq!(settings.percentage, 20.0);
        listener.abort();
    }
}
