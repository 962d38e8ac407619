use chrono::Utc;
use log::{info, warn};

use crate::bilibili::BilibiliClient;
use crate::normalizer;
use crate::youtube::{self, TranscriptFetcher};
use crate::{ExtractionBundle, Platform, Result, SubtitleBlock, TranscriptItem, VideoMetadata, resolve_identity};

/// The read-only view of a page visit: its URL and, when available, its DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: Option<String>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }
}

/// Builds one [`ExtractionBundle`] per page visit
pub struct Extractor {
    transcripts: TranscriptFetcher,
    bilibili: BilibiliClient,
    lang: Option<String>,
}

impl Extractor {
    pub fn new(transcripts: TranscriptFetcher, bilibili: BilibiliClient) -> Self {
        Self {
            transcripts,
            bilibili,
            lang: None,
        }
    }

    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang.filter(|l| !l.is_empty());
        self
    }

    /// Extract metadata and subtitles for a page.
    ///
    /// Metadata failures abort the extraction. Transcript failures are logged and
    /// replaced by an empty subtitle block.
    pub async fn extract(&self, page: &PageSnapshot) -> Result<ExtractionBundle> {
        let identity = resolve_identity(&page.url)?;
        info!("Extracting {} video {}", identity.platform, identity.id);

        let (metadata, subtitles) = match identity.platform {
            Platform::YouTube => {
                let lang = self.lang.as_deref();
                let (metadata, transcript) = match page.html {
                    Some(ref html) => {
                        let metadata = youtube::page_metadata(&identity.id, &page.url, html);
                        (metadata, self.transcripts.fetch_transcript(&identity.id, lang).await)
                    }
                    None => {
                        // one watch page serves both metadata and caption tracks
                        let watch = self.transcripts.watch_page(&identity.id, lang).await?;
                        let metadata = youtube::page_metadata(&identity.id, &page.url, &watch);
                        let transcript = self
                            .transcripts
                            .fetch_transcript_from_page(&identity.id, &watch, lang)
                            .await;
                        (metadata, transcript)
                    }
                };
                let subtitles = self.youtube_subtitles(&metadata, transcript)?;
                (metadata, subtitles)
            }
            Platform::Bilibili => {
                let metadata = self.bilibili.metadata(&identity, &page.url).await?;
                (metadata, not_requested())
            }
        };

        info!(
            "Extracted '{}' with {} subtitles ({})",
            metadata.title,
            subtitles.items.len(),
            subtitles.language_code
        );
        Ok(ExtractionBundle {
            metadata,
            subtitles,
            extracted_at: Utc::now(),
        })
    }

    fn youtube_subtitles(
        &self,
        metadata: &VideoMetadata,
        transcript: Result<Vec<TranscriptItem>>,
    ) -> Result<SubtitleBlock> {
        let items = match transcript {
            Ok(items) => items,
            Err(e) if e.is_transcript_failure() => {
                warn!("Transcript unavailable for {}, continuing without subtitles: {e}", metadata.video_id);
                return Ok(no_subtitles());
            }
            Err(e) => return Err(e),
        };

        let converted = normalizer::from_transcript(&items);
        normalizer::log_conversion_summary(items.len(), &converted, Platform::YouTube.tag());

        let language = items
            .first()
            .map(|item| item.lang.clone())
            .or_else(|| self.lang.clone())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(SubtitleBlock {
            title: format!("{} - Subtitles", metadata.title),
            language: language.clone(),
            language_code: language,
            items: converted,
        })
    }
}

fn no_subtitles() -> SubtitleBlock {
    SubtitleBlock {
        title: "No subtitles".to_string(),
        language: "none".to_string(),
        language_code: "none".to_string(),
        items: Vec::new(),
    }
}

fn not_requested() -> SubtitleBlock {
    SubtitleBlock {
        title: "Bilibili subtitles not requested".to_string(),
        language: "n/a".to_string(),
        language_code: "none".to_string(),
        items: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::SubgrabError;
    use crate::cache::{CacheInterceptor, TranscriptCache};
    use crate::capture::TokenLookup;
    use crate::clock::testing::ManualClock;
    use crate::http::HttpClient;
    use crate::http::testing::StubTransport;

    const WATCH_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
    const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";
    const WATCH_PAGE: &str = r#"<html><head><title>Never Gonna Give You Up - YouTube</title><meta property="og:description" content="Official video"></head><body><script>var ytInitialPlayerResponse = {"playabilityStatus":{"status":"OK"},"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=en","name":{"simpleText":"English"},"languageCode":"en"}]}},"videoDetails":{"videoId":"dQw4w9WgXcQ"}};</script></body></html>"#;
    const NO_CAPTIONS_PAGE: &str = r#"<html><head><title>Silent - YouTube</title></head><body><script>{"playabilityStatus":{"status":"OK"},"videoDetails":{}}</script></body></html>"#;
    const JSON3_BODY: &str = r#"{"events":[{"tStartMs":1000,"dDurationMs":2000,"segs":[{"utf8":"Hello"}]}]}"#;

    fn extractor() -> (Arc<StubTransport>, Extractor) {
        let clock = Arc::new(ManualClock::at(0));
        let transport = StubTransport::new();
        let cache = Arc::new(TranscriptCache::new(clock));
        let http = HttpClient::new(transport.clone()).with_interceptor(Arc::new(CacheInterceptor::new(cache.clone())));
        let lookup = TokenLookup::new(None, Duration::from_millis(10));
        let extractor = Extractor::new(
            TranscriptFetcher::new(http.clone(), cache, lookup),
            BilibiliClient::new(http),
        );
        (transport, extractor)
    }

    #[tokio::test]
    async fn test_youtube_bundle_from_snapshot() {
        let (transport, extractor) = extractor();
        transport.route(WATCH_URL, 200, WATCH_PAGE);
        transport.route(TIMEDTEXT_URL, 200, JSON3_BODY);

        let page = PageSnapshot::new(WATCH_URL).with_html(WATCH_PAGE);
        let bundle = extractor.extract(&page).await.unwrap();

        assert_eq!(bundle.metadata.title, "Never Gonna Give You Up");
        assert_eq!(bundle.metadata.description.as_deref(), Some("Official video"));
        assert_eq!(bundle.subtitles.title, "Never Gonna Give You Up - Subtitles");
        assert_eq!(bundle.subtitles.language_code, "en");
        assert_eq!(bundle.subtitles.items.len(), 1);
        let first = &bundle.subtitles.items[0];
        assert_eq!((first.sequence_id, first.start, first.end), (1, 1.0, 3.0));
        assert_eq!(transport.count(WATCH_URL), 1);
    }

    #[tokio::test]
    async fn test_transcript_failure_downgrades_to_empty_block() {
        let (transport, extractor) = extractor();
        transport.route(WATCH_URL, 200, NO_CAPTIONS_PAGE);

        let bundle = extractor.extract(&PageSnapshot::new(WATCH_URL)).await.unwrap();

        assert_eq!(bundle.metadata.title, "Silent");
        assert_eq!(bundle.subtitles.title, "No subtitles");
        assert_eq!(bundle.subtitles.language, "none");
        assert!(bundle.subtitles.is_empty());
    }

    #[tokio::test]
    async fn test_language_mismatch_still_returns_metadata() {
        let (transport, extractor) = extractor();
        transport.route(WATCH_URL, 200, WATCH_PAGE);
        let extractor = extractor.with_lang(Some("fr".to_string()));

        let bundle = extractor.extract(&PageSnapshot::new(WATCH_URL)).await.unwrap();
        assert_eq!(bundle.subtitles.language_code, "none");
        assert_eq!(transport.count(TIMEDTEXT_URL), 0);
    }

    #[tokio::test]
    async fn test_watch_page_failures_surface_unchanged() {
        let (captcha, limited) = extractor();
        captcha.route(WATCH_URL, 200, r#"<div class="g-recaptcha"></div>"#);
        let err = limited.extract(&PageSnapshot::new(WATCH_URL)).await.unwrap_err();
        assert!(matches!(err, SubgrabError::TooManyRequests));

        let (removed, unavailable) = extractor();
        removed.route(WATCH_URL, 200, "<html><body>gone</body></html>");
        let err = unavailable.extract(&PageSnapshot::new(WATCH_URL)).await.unwrap_err();
        assert!(matches!(err, SubgrabError::VideoUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_watch_page_fetched_once_without_snapshot() {
        let (transport, extractor) = extractor();
        transport.route(WATCH_URL, 200, WATCH_PAGE);
        transport.route(TIMEDTEXT_URL, 200, JSON3_BODY);

        let bundle = extractor.extract(&PageSnapshot::new(WATCH_URL)).await.unwrap();

        assert_eq!(bundle.metadata.title, "Never Gonna Give You Up");
        assert_eq!(bundle.subtitles.items.len(), 1);
        assert_eq!(transport.count(WATCH_URL), 1);
        assert_eq!(transport.count(TIMEDTEXT_URL), 1);
    }

    #[tokio::test]
    async fn test_bilibili_never_requests_subtitles() {
        let (transport, extractor) = extractor();
        transport.route(
            "https://api.bilibili.com/x/web-interface/view?bvid=BV1xx411c7mD",
            200,
            r#"{"code":0,"data":{"bvid":"BV1xx411c7mD","aid":1,"cid":2,"title":"Bili","pages":[{"cid":2,"page":1}]}}"#,
        );

        let page = PageSnapshot::new("https://www.bilibili.com/video/BV1xx411c7mD");
        let bundle = extractor.extract(&page).await.unwrap();

        assert_eq!(bundle.metadata.platform, Platform::Bilibili);
        assert_eq!(bundle.metadata.title, "Bili");
        assert_eq!(bundle.subtitles.title, "Bilibili subtitles not requested");
        assert_eq!(bundle.subtitles.language, "n/a");
        assert!(bundle.subtitles.is_empty());
        assert_eq!(transport.count("https://api.bilibili.com/x/player"), 0);
    }

    #[tokio::test]
    async fn test_bilibili_metadata_failure_propagates() {
        let (transport, extractor) = extractor();
        transport.route(
            "https://api.bilibili.com/x/web-interface/view?bvid=BV1xx411c7mD",
            200,
            r#"{"code":-404,"message":"not found"}"#,
        );
        let page = PageSnapshot::new("https://www.bilibili.com/video/BV1xx411c7mD");
        let err = extractor.extract(&page).await.unwrap_err();
        assert!(matches!(err, SubgrabError::MetadataFetchFailed(ref m) if m == "not found"));
    }

    #[tokio::test]
    async fn test_unsupported_page() {
        let (transport, extractor) = extractor();
        let err = extractor
            .extract(&PageSnapshot::new("https://vimeo.com/12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubgrabError::UnsupportedPlatform { .. }));
        assert!(transport.urls().is_empty());
    }
}
