use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use url::Url;

use crate::{
    identity::{VideoIdentifier, VideoKind},
    settings::EngineConfig,
};

use super::{
    retry::{with_retry, RetryPolicy},
    RemoteError,
};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_warn};

/// Metadata and captions of one video, ready to forward to detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionsInfo {
    /// Id of the video the data was fetched for, as the platform names it.
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    pub uploader_mid: Option<i64>,
    pub duration: f64,
    pub has_captions: bool,
    pub payload: Value,
}

impl CaptionsInfo {
    /// Whether this data describes `id`. A bare upload id matches any of its
    /// parts, and a part-suffixed id matches its bare form.
    pub fn matches(&self, id: &VideoIdentifier) -> bool {
        if self.video_id == id.canonical_key() || self.video_id == id.base_key() {
            return true;
        }
        VideoIdentifier::from_canonical(&self.video_id)
            .is_some_and(|fetched| fetched.base_key() == id.base_key())
    }
}

#[async_trait]
pub trait CaptionsProvider: Send + Sync {
    async fn lookup(&self, id: &VideoIdentifier) -> Result<CaptionsInfo, RemoteError>;
}

/// Quick "does this upload have captions" probe used by list prefetch.
#[async_trait]
pub trait SubtitleProbe: Send + Sync {
    async fn has_subtitle(&self, bvid: &str) -> Result<bool, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_payload(self) -> Result<T, RemoteError> {
        if self.code != 0 {
            return Err(RemoteError::Rejected {
                message: format!("code {}: {}", self.code, self.message),
            });
        }
        self.data
            .or(self.result)
            .ok_or_else(|| RemoteError::InvalidResponse("response without payload".into()))
    }
}

#[derive(Debug, Deserialize)]
struct Owner {
    mid: i64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    cid: i64,
    page: u32,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct VideoView {
    bvid: String,
    aid: i64,
    cid: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: f64,
    owner: Option<Owner>,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    id: i64,
    aid: i64,
    cid: i64,
    #[serde(default)]
    bvid: String,
    /// Milliseconds.
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    long_title: String,
}

#[derive(Debug, Deserialize)]
struct UpInfo {
    mid: i64,
    #[serde(default)]
    uname: String,
}

#[derive(Debug, Deserialize)]
struct Season {
    #[serde(default)]
    title: String,
    #[serde(default)]
    episodes: Vec<Episode>,
    up_info: Option<UpInfo>,
}

#[derive(Debug, Deserialize)]
struct PlayerInfo {
    subtitle: Option<PlayerSubtitles>,
}

#[derive(Debug, Deserialize)]
struct PlayerSubtitles {
    #[serde(default)]
    subtitles: Vec<Value>,
}

/// What both lookups resolve to before captions are fetched.
struct Target {
    video_id: String,
    aid: i64,
    cid: i64,
    title: String,
    uploader: String,
    uploader_mid: Option<i64>,
    duration: f64,
}

/// Reads metadata and captions from the public video platform API.
pub struct BilibiliCaptionsClient {
    client: reqwest::Client,
    api_base: Url,
    retry: RetryPolicy,
}

impl BilibiliCaptionsClient {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build captions HTTP client")?;
        let api_base = Url::parse(&config.captions_api_base)
            .with_context(|| format!("invalid captions api base '{}'", config.captions_api_base))?;

        Ok(Self {
            client,
            api_base,
            retry: config.retry_policy(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let client = &self.client;
        let url = &url;
        with_retry(self.retry, url.path(), move || async move {
            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RemoteError::ServerStatus {
                    status: status.as_u16(),
                });
            }
            response
                .json::<T>()
                .await
                .map_err(|err| RemoteError::InvalidResponse(err.to_string()))
        })
        .await
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, RemoteError> {
        let mut url = self
            .api_base
            .join(path)
            .map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    async fn view(&self, query: (&str, String)) -> Result<VideoView, RemoteError> {
        let url = self.endpoint("/x/web-interface/view", &[query])?;
        self.get_json::<Envelope<VideoView>>(url).await?.into_payload()
    }

    async fn season(&self, query: (&str, String)) -> Result<Season, RemoteError> {
        let url = self.endpoint("/pgc/view/web/season", &[query])?;
        self.get_json::<Envelope<Season>>(url).await?.into_payload()
    }

    async fn subtitle_tracks(&self, aid: i64, cid: i64) -> Result<Vec<Value>, RemoteError> {
        let url = self.endpoint(
            "/x/player/wbi/v2",
            &[("aid", aid.to_string()), ("cid", cid.to_string())],
        )?;
        let info = self.get_json::<Envelope<PlayerInfo>>(url).await?.into_payload()?;
        Ok(info.subtitle.map(|s| s.subtitles).unwrap_or_default())
    }

    /// Downloads the preferred track's cue list. Track URLs are usually
    /// scheme-relative.
    async fn subtitle_body(&self, tracks: &[Value]) -> Option<Value> {
        let track = tracks
            .iter()
            .find(|track| track["is_default"].as_bool().unwrap_or(false))
            .or_else(|| tracks.first())?;
        let raw = track["subtitle_url"].as_str().filter(|u| !u.is_empty())?;
        let absolute = if raw.starts_with("//") {
            format!("https:{raw}")
        } else {
            raw.to_string()
        };
        let url = Url::parse(&absolute).ok()?;

        match self.get_json::<Value>(url).await {
            Ok(body) => body.get("body").cloned().filter(|b| b.as_array().is_some_and(|a| !a.is_empty())),
            Err(err) => {
                log_warn!("subtitle download failed: {err}");
                None
            }
        }
    }

    async fn resolve_target(&self, id: &VideoIdentifier) -> Result<Target, RemoteError> {
        match id.kind {
            VideoKind::Bv | VideoKind::Av => {
                let query = if id.kind == VideoKind::Bv {
                    ("bvid", id.base_key())
                } else {
                    ("aid", id.value.clone())
                };
                let view = self.view(query).await?;
                let page = view.pages.iter().find(|page| page.page == id.part());
                let (cid, duration) = match page {
                    Some(page) => (page.cid, page.duration),
                    None => (view.cid, view.duration),
                };
                let video_id = if id.is_multi_part() {
                    format!("{}_p{}", view.bvid, id.part())
                } else {
                    view.bvid.clone()
                };
                Ok(Target {
                    video_id,
                    aid: view.aid,
                    cid,
                    title: view.title,
                    uploader: view.owner.as_ref().map(|o| o.name.clone()).unwrap_or_default(),
                    uploader_mid: view.owner.as_ref().map(|o| o.mid),
                    duration,
                })
            }
            VideoKind::Ep | VideoKind::Ss => {
                let query = if id.kind == VideoKind::Ep {
                    ("ep_id", id.value.clone())
                } else {
                    ("season_id", id.value.clone())
                };
                let season = self.season(query).await?;
                let episode = match id.kind {
                    VideoKind::Ep => season
                        .episodes
                        .iter()
                        .find(|ep| ep.id.to_string() == id.value),
                    _ => season.episodes.first(),
                }
                .ok_or_else(|| RemoteError::InvalidResponse(format!("no episode for {id}")))?;

                log_debug!("{id} resolved to episode {} ({})", episode.id, episode.bvid);
                Ok(Target {
                    video_id: id.canonical_key(),
                    aid: episode.aid,
                    cid: episode.cid,
                    title: if episode.long_title.is_empty() {
                        season.title.clone()
                    } else {
                        format!("{} {}", season.title, episode.long_title)
                    },
                    uploader: season.up_info.as_ref().map(|u| u.uname.clone()).unwrap_or_default(),
                    uploader_mid: season.up_info.as_ref().map(|u| u.mid),
                    duration: episode.duration / 1000.0,
                })
            }
        }
    }
}

#[async_trait]
impl CaptionsProvider for BilibiliCaptionsClient {
    async fn lookup(&self, id: &VideoIdentifier) -> Result<CaptionsInfo, RemoteError> {
        let target = self.resolve_target(id).await?;
        let tracks = self.subtitle_tracks(target.aid, target.cid).await?;
        let body = if tracks.is_empty() {
            None
        } else {
            self.subtitle_body(&tracks).await
        };

        let has_captions = body.is_some();
        let payload = json!({
            "bvid": target.video_id,
            "aid": target.aid,
            "cid": target.cid,
            "title": target.title,
            "owner": { "mid": target.uploader_mid, "name": target.uploader },
            "duration": target.duration,
            "subtitle": { "subtitles": tracks },
            "hasSubtitle": has_captions,
            "subtitle_contents": body.map(|b| vec![b]).unwrap_or_default(),
        });

        Ok(CaptionsInfo {
            video_id: target.video_id,
            title: target.title,
            uploader: target.uploader,
            uploader_mid: target.uploader_mid,
            duration: target.duration,
            has_captions,
            payload,
        })
    }
}

#[async_trait]
impl SubtitleProbe for BilibiliCaptionsClient {
    async fn has_subtitle(&self, bvid: &str) -> Result<bool, RemoteError> {
        let view = self.view(("bvid", bvid.to_string())).await?;
        let tracks = self.subtitle_tracks(view.aid, view.cid).await?;
        Ok(!tracks.is_empty())
    }
}
