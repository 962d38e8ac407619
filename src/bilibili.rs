use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{HttpClient, HttpRequest, USER_AGENT};
use crate::identity::query_param;
use crate::normalizer;
use crate::{CanonicalSubtitle, Platform, Result, SubgrabError, VideoIdentity, VideoMetadata};

const VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";
const PLAYER_API: &str = "https://api.bilibili.com/x/player/v2";
const REFERER: &str = "https://www.bilibili.com/";

/// The two id forms a Bilibili video page can carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BilibiliId {
    Bvid(String),
    Aid(u64),
}

impl BilibiliId {
    pub fn parse(id: &str) -> Option<Self> {
        if id.starts_with("BV") && id.len() > 2 {
            return Some(BilibiliId::Bvid(id.to_string()));
        }
        id.strip_prefix("av")
            .and_then(|digits| digits.parse().ok())
            .map(BilibiliId::Aid)
    }

    fn query(&self) -> String {
        match self {
            BilibiliId::Bvid(bvid) => format!("bvid={bvid}"),
            BilibiliId::Aid(aid) => format!("aid={aid}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    bvid: Option<String>,
    aid: Option<u64>,
    cid: Option<u64>,
    title: Option<String>,
    desc: Option<String>,
    duration: Option<u64>,
    owner: Option<Owner>,
    #[serde(default)]
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    name: Option<String>,
    mid: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    cid: u64,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    subtitle: Option<SubtitleInfo>,
}

#[derive(Debug, Deserialize)]
struct SubtitleInfo {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
}

#[derive(Debug, Deserialize)]
struct SubtitleDocument {
    body: Option<Vec<Value>>,
}

/// One subtitle track listed by the player endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub lan: String,
    pub lan_doc: Option<String>,
    pub subtitle_url: String,
}

/// A video resolved to the ids the player needs
#[derive(Debug, Clone, PartialEq)]
pub struct BilibiliVideo {
    pub bvid: String,
    pub aid: u64,
    pub cid: u64,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<u64>,
    pub uploader_name: Option<String>,
    pub uploader_id: Option<String>,
    pub current_part: u32,
    pub total_parts: usize,
}

/// First available subtitle track with its raw body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BilibiliSubtitleSet {
    pub title: String,
    pub language: String,
    pub language_code: String,
    pub body: Vec<Value>,
    pub tracks: Vec<SubtitleTrack>,
}

impl BilibiliSubtitleSet {
    pub fn to_canonical(&self) -> Vec<CanonicalSubtitle> {
        normalizer::normalize(&self.body, Platform::Bilibili.tag())
    }
}

pub struct BilibiliClient {
    http: HttpClient,
}

impl BilibiliClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn request(url: &str) -> HttpRequest {
        HttpRequest::get(url)
            .header("Referer", REFERER)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
    }

    async fn get_envelope<T: DeserializeOwned>(&self, url: &str) -> Result<(u16, Option<ApiEnvelope<T>>)> {
        let response = self.http.send(Self::request(url)).await?;
        if !response.is_success() {
            return Ok((response.status, None));
        }
        let envelope = serde_json::from_str(&response.body)
            .map_err(|e| debug!("Unexpected response from {url}: {e}"))
            .ok();
        Ok((response.status, envelope))
    }

    async fn view_info(&self, id: &BilibiliId) -> Result<ViewData> {
        let url = format!("{VIEW_API}?{}", id.query());
        let (status, envelope) = self.get_envelope::<ViewData>(&url).await?;
        let envelope =
            envelope.ok_or_else(|| SubgrabError::MetadataFetchFailed(format!("view info request returned HTTP {status}")))?;

        if envelope.code != 0 {
            return Err(SubgrabError::MetadataFetchFailed(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| SubgrabError::MetadataFetchFailed("view info payload missing".to_string()))
    }

    /// Resolve a canonical id to aid/cid for the given part (1-based)
    pub async fn resolve_video(&self, video_id: &str, part: u32) -> Result<BilibiliVideo> {
        let id = BilibiliId::parse(video_id).ok_or_else(|| SubgrabError::InvalidVideoIdentifier {
            input: video_id.to_string(),
        })?;
        let data = self.view_info(&id).await?;

        let aid = data.aid.or(match id {
            BilibiliId::Aid(aid) => Some(aid),
            BilibiliId::Bvid(_) => None,
        });
        let cid = match data.pages.iter().find(|p| p.page == part) {
            Some(page) => Some(page.cid),
            None => data.pages.first().map(|p| p.cid).or(data.cid),
        };

        let (Some(aid), Some(cid)) = (aid.filter(|a| *a > 0), cid.filter(|c| *c > 0)) else {
            return Err(SubgrabError::MissingPageIdentifiers {
                video_id: video_id.to_string(),
            });
        };

        let bvid = data.bvid.filter(|b| !b.is_empty()).unwrap_or_else(|| match id {
            BilibiliId::Bvid(bvid) => bvid,
            BilibiliId::Aid(aid) => format!("av{aid}"),
        });
        info!("Resolved Bilibili video {video_id}: aid={aid} cid={cid} part={part}");

        let owner = data.owner;
        Ok(BilibiliVideo {
            bvid,
            aid,
            cid,
            title: data.title.unwrap_or_default(),
            description: data.desc.filter(|d| !d.is_empty()),
            duration: data.duration,
            uploader_name: owner.as_ref().and_then(|o| o.name.clone()),
            uploader_id: owner.as_ref().and_then(|o| o.mid).map(|mid| mid.to_string()),
            current_part: part,
            total_parts: data.pages.len().max(1),
        })
    }

    /// Metadata for the part currently open on the page (`?p=`, default 1)
    pub async fn metadata(&self, identity: &VideoIdentity, page_url: &str) -> Result<VideoMetadata> {
        let video = self.resolve_video(&identity.id, part_number(page_url)).await?;
        Ok(VideoMetadata {
            platform: Platform::Bilibili,
            thumbnail_url: Some(thumbnail_url(&video.bvid)),
            video_id: video.bvid,
            title: video.title,
            description: video.description,
            duration: video.duration,
            uploader_name: video.uploader_name,
            uploader_id: video.uploader_id,
            url: page_url.to_string(),
        })
    }

    /// First subtitle track of a part. No tracks is an empty set, not an error.
    pub async fn fetch_subtitles(&self, aid: u64, cid: u64) -> Result<BilibiliSubtitleSet> {
        let url = format!("{PLAYER_API}?aid={aid}&cid={cid}");
        let (status, envelope) = self.get_envelope::<PlayerData>(&url).await?;
        let envelope =
            envelope.ok_or_else(|| SubgrabError::SubtitleFetchFailed(format!("subtitle list request returned HTTP {status}")))?;
        if envelope.code != 0 {
            return Err(SubgrabError::SubtitleFetchFailed(
                envelope.message.unwrap_or_else(|| "subtitle list request rejected".to_string()),
            ));
        }

        let tracks = envelope
            .data
            .and_then(|d| d.subtitle)
            .map(|s| s.subtitles)
            .unwrap_or_default();
        let Some(selected) = tracks.first().cloned() else {
            debug!("No subtitles listed for aid={aid} cid={cid}");
            return Ok(BilibiliSubtitleSet::default());
        };

        let label = selected.lan_doc.clone().filter(|d| !d.is_empty());
        debug!(
            "Selected subtitle track {} ({})",
            label.as_deref().unwrap_or(&selected.lan),
            selected.lan
        );

        let body_url = absolute_url(&selected.subtitle_url);
        let response = self.http.send(Self::request(&body_url)).await?;
        if !response.is_success() {
            return Err(SubgrabError::SubtitleFetchFailed(format!(
                "subtitle body request returned HTTP {}",
                response.status
            )));
        }
        let document: SubtitleDocument = serde_json::from_str(&response.body)?;
        let body = document
            .body
            .ok_or_else(|| SubgrabError::SubtitleFetchFailed("subtitle body missing".to_string()))?;
        info!("Fetched {} subtitle entries for aid={aid} cid={cid}", body.len());

        let language_code = if selected.lan.is_empty() {
            "unknown".to_string()
        } else {
            selected.lan.clone()
        };
        Ok(BilibiliSubtitleSet {
            title: label.clone().unwrap_or_else(|| language_code.clone()),
            language: label.unwrap_or_else(|| language_code.clone()),
            language_code,
            body,
            tracks,
        })
    }
}

/// Part number from the page's `p` query parameter
pub fn part_number(page_url: &str) -> u32 {
    query_param(page_url, "p")
        .and_then(|p| p.parse().ok())
        .filter(|p| *p > 0)
        .unwrap_or(1)
}

pub fn thumbnail_url(bvid: &str) -> String {
    format!("https://i0.hdslb.com/bfs/archive/{bvid}.jpg")
}

fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}
