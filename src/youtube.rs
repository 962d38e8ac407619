use std::sync::{Arc, LazyLock};

use log::{debug, info, warn};
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::cache::TranscriptCache;
use crate::capture::TokenLookup;
use crate::http::{HttpClient, HttpRequest, USER_AGENT};
use crate::identity::resolve_identity;
use crate::{Platform, Result, SubgrabError, TranscriptItem, VideoMetadata};

const CAPTCHA_MARKER: &str = r#"class="g-recaptcha""#;
const PLAYABILITY_MARKER: &str = r#""playabilityStatus":"#;
const CAPTIONS_MARKER: &str = r#""captions":"#;
const VIDEO_DETAILS_MARKER: &str = r#","videoDetails"#;

const TITLE_SUFFIX: &str = " - YouTube";

#[derive(Debug, Deserialize)]
struct CaptionsData {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    player_captions_tracklist_renderer: Option<CaptionTracklistRenderer>,
}

#[derive(Debug, Deserialize)]
struct CaptionTracklistRenderer {
    #[serde(rename = "captionTracks")]
    caption_tracks: Option<Vec<CaptionTrack>>,
}

#[derive(Debug, Deserialize)]
struct CaptionTrack {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "languageCode")]
    language_code: String,
    name: Option<TrackName>,
}

#[derive(Debug, Deserialize)]
struct TrackName {
    #[serde(rename = "simpleText")]
    simple_text: Option<String>,
    runs: Option<Vec<TextRun>>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    text: String,
}

/// One caption track advertised by a watch page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrackDescriptor {
    pub language_code: String,
    pub display_name: String,
    pub source_url: String,
}

impl From<CaptionTrack> for CaptionTrackDescriptor {
    fn from(track: CaptionTrack) -> Self {
        let display_name = track
            .name
            .and_then(|name| {
                name.simple_text.or_else(|| {
                    name.runs
                        .map(|runs| runs.into_iter().map(|r| r.text).collect::<String>())
                })
            })
            .unwrap_or_else(|| track.language_code.clone());
        Self {
            language_code: track.language_code,
            display_name,
            source_url: track.base_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Json3Document {
    events: Option<Vec<Json3Event>>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs")]
    start_ms: Option<f64>,
    #[serde(rename = "dDurationMs")]
    duration_ms: Option<f64>,
    segs: Option<Vec<Json3Segment>>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    utf8: Option<String>,
}

/// Fetches YouTube caption tracks, preferring a cached body and attaching a captured token
pub struct TranscriptFetcher {
    http: HttpClient,
    cache: Arc<TranscriptCache>,
    tokens: TokenLookup,
}

impl TranscriptFetcher {
    pub fn new(http: HttpClient, cache: Arc<TranscriptCache>, tokens: TokenLookup) -> Self {
        Self { http, cache, tokens }
    }

    /// Fetch the transcript of a video given its URL or bare id.
    ///
    /// An empty list means the track exists but carries no text; it is not an error.
    pub async fn fetch_transcript(&self, video: &str, lang: Option<&str>) -> Result<Vec<TranscriptItem>> {
        let identity = resolve_identity(video)?;
        if identity.platform != Platform::YouTube {
            return Err(SubgrabError::UnsupportedPlatform {
                input: video.to_string(),
            });
        }
        let video_id = identity.id;

        if let Some(parsed) = self.cached(&video_id, lang) {
            return parsed;
        }

        let page = self.watch_page(&video_id, lang).await?;
        self.fetch_from_tracks(&video_id, &page, lang).await
    }

    /// Same as [`fetch_transcript`](Self::fetch_transcript) for a watch page the caller already holds
    pub async fn fetch_transcript_from_page(
        &self,
        video_id: &str,
        page: &str,
        lang: Option<&str>,
    ) -> Result<Vec<TranscriptItem>> {
        if let Some(parsed) = self.cached(video_id, lang) {
            return parsed;
        }
        self.fetch_from_tracks(video_id, page, lang).await
    }

    fn cached(&self, video_id: &str, lang: Option<&str>) -> Option<Result<Vec<TranscriptItem>>> {
        let body = self.cache.get(video_id)?;
        info!("Using cached transcript for video {video_id}");
        Some(parse_transcript(&body, video_id, lang.unwrap_or("unknown")))
    }

    async fn fetch_from_tracks(&self, video_id: &str, page: &str, lang: Option<&str>) -> Result<Vec<TranscriptItem>> {
        let tracks = caption_tracks(page, video_id)?;
        let track = select_track(&tracks, lang, video_id)?;
        debug!("Using caption track: lang={} ({})", track.language_code, track.display_name);

        let transcript_url = match self.tokens.lookup(video_id).await {
            Some(token) => {
                debug!("Attaching caption token for video {video_id}");
                attach_token(&track.source_url, &token)?
            }
            None => {
                warn!("No caption token found for video {video_id}, using the original track URL");
                track.source_url.clone()
            }
        };

        let response = self.http.send(request(&transcript_url, lang)).await?;
        if !response.is_success() {
            return Err(SubgrabError::TranscriptNotAvailable {
                video_id: video_id.to_string(),
                status: response.status,
            });
        }

        parse_transcript(&response.body, video_id, &track.language_code)
    }

    /// Fetch the watch page and reject captcha challenges and unplayable videos
    pub async fn watch_page(&self, video_id: &str, lang: Option<&str>) -> Result<String> {
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        debug!("Fetching watch page: {watch_url}");

        let body = self.http.send(request(&watch_url, lang)).await?.body;

        if body.contains(CAPTCHA_MARKER) {
            return Err(SubgrabError::TooManyRequests);
        }
        if !body.contains(PLAYABILITY_MARKER) {
            return Err(SubgrabError::VideoUnavailable {
                video_id: video_id.to_string(),
            });
        }
        Ok(body)
    }
}

fn request(url: &str, lang: Option<&str>) -> HttpRequest {
    let request = HttpRequest::get(url).header("User-Agent", USER_AGENT);
    match lang {
        Some(lang) => request.header("Accept-Language", lang),
        None => request,
    }
}

/// Caption tracks embedded in a watch page's player response
pub fn caption_tracks(page: &str, video_id: &str) -> Result<Vec<CaptionTrackDescriptor>> {
    let disabled = || SubgrabError::TranscriptsDisabled {
        video_id: video_id.to_string(),
    };

    let (_, after) = page.split_once(CAPTIONS_MARKER).ok_or_else(disabled)?;
    let fragment = after
        .split(VIDEO_DETAILS_MARKER)
        .next()
        .unwrap_or_default()
        .replacen('\n', "", 1);

    let captions: CaptionsData = serde_json::from_str(&fragment).map_err(|e| {
        debug!("Caption fragment is not valid JSON: {e}");
        disabled()
    })?;

    let tracks = captions
        .player_captions_tracklist_renderer
        .and_then(|r| r.caption_tracks)
        .ok_or_else(disabled)?;

    Ok(tracks.into_iter().map(CaptionTrackDescriptor::from).collect())
}

/// Pick a track: exact language match, then primary-subtag prefix, else the first one.
pub fn select_track<'a>(
    tracks: &'a [CaptionTrackDescriptor],
    lang: Option<&str>,
    video_id: &str,
) -> Result<&'a CaptionTrackDescriptor> {
    let Some(lang) = lang else {
        return tracks.first().ok_or_else(|| SubgrabError::TranscriptsDisabled {
            video_id: video_id.to_string(),
        });
    };

    if let Some(track) = tracks.iter().find(|t| t.language_code == lang) {
        return Ok(track);
    }

    // zh matches zh-CN; first listed wins
    let primary = lang.split('-').next().unwrap_or(lang);
    tracks
        .iter()
        .find(|t| t.language_code.starts_with(primary))
        .ok_or_else(|| SubgrabError::LanguageNotAvailable {
            lang: lang.to_string(),
            video_id: video_id.to_string(),
            available: tracks.iter().map(|t| t.language_code.clone()).collect(),
        })
}

/// Add the captured token plus the json3 format selectors to a track URL
pub fn attach_token(track_url: &str, token: &str) -> Result<String> {
    let params = [("pot", token), ("fmt", "json3"), ("c", "WEB")];
    let mut url = Url::parse(track_url)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(name, _)| k.as_ref() == *name))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

/// Parse a transcript body: json3 events first, legacy `<text>` markup second.
///
/// Markup whose `<text>` elements are all blank is an empty transcript. Anything else
/// that yields no line is an error.
pub fn parse_transcript(body: &str, video_id: &str, lang: &str) -> Result<Vec<TranscriptItem>> {
    if body.trim().is_empty() {
        return Err(SubgrabError::UnparseableTranscript {
            video_id: video_id.to_string(),
            reason: "empty transcript response".to_string(),
        });
    }

    if let Some(items) = parse_json3(body, lang).filter(|items| !items.is_empty()) {
        return Ok(items);
    }

    let legacy = parse_caption_xml(body, lang);
    if legacy.saw_text {
        if legacy.items.is_empty() {
            debug!("Transcript for {video_id} has caption elements but no text");
        }
        return Ok(legacy.items);
    }

    if looks_like_html(body) {
        return Err(SubgrabError::UnexpectedHtmlResponse {
            video_id: video_id.to_string(),
        });
    }

    Err(SubgrabError::UnparseableTranscript {
        video_id: video_id.to_string(),
        reason: "response is neither json3 events nor timedtext markup".to_string(),
    })
}

/// `None` when the body is not a json3 document at all
fn parse_json3(body: &str, lang: &str) -> Option<Vec<TranscriptItem>> {
    let document: Json3Document = serde_json::from_str(body).ok()?;
    let events = document.events?;

    let items = events
        .into_iter()
        .filter_map(|event| {
            let text: String = event
                .segs?
                .into_iter()
                .filter_map(|seg| seg.utf8)
                .collect();
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptItem {
                text: text.to_string(),
                start: ms_to_secs(event.start_ms),
                duration: ms_to_secs(event.duration_ms),
                lang: lang.to_string(),
            })
        })
        .collect();
    Some(items)
}

fn ms_to_secs(ms: Option<f64>) -> f64 {
    ms.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0) / 1000.0
}

fn parse_secs(raw: &[u8]) -> f64 {
    String::from_utf8_lossy(raw)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .max(0.0)
}

struct CaptionMarkup {
    items: Vec<TranscriptItem>,
    saw_text: bool,
}

/// Legacy `<text start=".." dur="..">` markup. Stops at the first malformed event.
fn parse_caption_xml(xml: &str, lang: &str) -> CaptionMarkup {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut markup = CaptionMarkup {
        items: Vec::new(),
        saw_text: false,
    };
    let mut current: Option<(f64, f64, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"text" => {
                let mut start = 0.0;
                let mut dur = 0.0;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"start" => start = parse_secs(&attr.value),
                        b"dur" => dur = parse_secs(&attr.value),
                        _ => {}
                    }
                }
                markup.saw_text = true;
                current = Some((start, dur, String::new()));
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, _, ref mut raw)) = current {
                    // a bare `&` fails unescaping; keep the raw text and let the entity pass decode it
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned());
                    raw.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some((_, _, ref mut raw)) = current {
                    raw.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"text" => {
                if let Some((start, duration, raw)) = current.take() {
                    let text = html_escape::decode_html_entities(&raw).to_string();
                    if !text.trim().is_empty() {
                        markup.items.push(TranscriptItem {
                            text,
                            start,
                            duration,
                            lang: lang.to_string(),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("Stopped reading caption markup: {e}");
                break;
            }
            _ => {}
        }
    }

    markup
}

fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start().to_ascii_lowercase();
    head.contains("<!doctype html") || head.contains("<html")
}

static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static OG_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:description"]"#).unwrap());
static CHANNEL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ytd-channel-name a, .ytd-video-owner-renderer a").unwrap());
static AUTHOR_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[itemprop="author"] [itemprop="name"]"#).unwrap());
static DOCUMENT_TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

/// Metadata scraped from a watch page document
pub fn page_metadata(video_id: &str, page_url: &str, html: &str) -> VideoMetadata {
    let document = Html::parse_document(html);

    let meta_content = |selector: &Selector| {
        document
            .select(selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = meta_content(&OG_TITLE)
        .or_else(|| {
            document
                .select(&DOCUMENT_TITLE)
                .next()
                .map(|el| el.text().collect::<String>())
                .map(|t| t.trim().trim_end_matches(TITLE_SUFFIX).trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| format!("YouTube Video {video_id}"));

    let uploader_name = document
        .select(&CHANNEL_LINK)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|s| !s.is_empty())
        .or_else(|| meta_content(&AUTHOR_NAME));

    VideoMetadata {
        platform: Platform::YouTube,
        video_id: video_id.to_string(),
        title,
        description: meta_content(&OG_DESCRIPTION),
        duration: Some(0),
        uploader_name,
        uploader_id: None,
        url: page_url.to_string(),
        thumbnail_url: Some(thumbnail_url(video_id)),
    }
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}
