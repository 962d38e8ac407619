use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use url::Url;

use crate::clock::Clock;
use crate::http::{HttpRequest, HttpResponse, Interceptor};

/// Entries older than this are treated as absent
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

const TRANSCRIPT_ENDPOINT: &str = "youtube.com/api/timedtext";

#[derive(Debug, Clone)]
struct CachedTranscript {
    body: String,
    captured_at_ms: u64,
}

/// Raw transcript bodies keyed by video id
pub struct TranscriptCache {
    entries: Mutex<HashMap<String, CachedTranscript>>,
    clock: Arc<dyn Clock>,
}

impl TranscriptCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Load a cached body, evicting it if it has outlived the freshness window.
    pub fn get(&self, video_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(video_id)?;
        let age = self.clock.now_ms().saturating_sub(entry.captured_at_ms);
        if age > FRESHNESS_WINDOW.as_millis() as u64 {
            debug!("Cache expired: {video_id} ({age} ms old)");
            entries.remove(video_id);
            return None;
        }
        debug!("Cache hit: {video_id}");
        Some(entry.body.clone())
    }

    /// Store a body, replacing whatever was there.
    pub fn put(&self, video_id: &str, body: &str) {
        let entry = CachedTranscript {
            body: body.to_string(),
            captured_at_ms: self.clock.now_ms(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(video_id.to_string(), entry);
        debug!("Cached transcript: {video_id}");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fills the cache from caption responses seen on the wire
pub struct CacheInterceptor {
    cache: Arc<TranscriptCache>,
}

impl CacheInterceptor {
    pub fn new(cache: Arc<TranscriptCache>) -> Self {
        Self { cache }
    }
}

impl Interceptor for CacheInterceptor {
    fn on_response(&self, request: &HttpRequest, response: &HttpResponse) {
        if !request.url.contains(TRANSCRIPT_ENDPOINT) || !response.is_success() {
            return;
        }
        let video_id = Url::parse(&request.url).ok().and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())
        });
        if let Some(video_id) = video_id.filter(|v| !v.is_empty()) {
            self.cache.put(&video_id, &response.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;

    #[test]
    fn test_fresh_until_window_ends() {
        let clock = Arc::new(ManualClock::at(10_000));
        let cache = TranscriptCache::new(clock.clone());
        cache.put("dQw4w9WgXcQ", "body");

        clock.advance_secs(299);
        assert_eq!(cache.get("dQw4w9WgXcQ").as_deref(), Some("body"));

        clock.advance_secs(2);
        assert_eq!(cache.get("dQw4w9WgXcQ"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites_and_restamps() {
        let clock = Arc::new(ManualClock::at(0));
        let cache = TranscriptCache::new(clock.clone());
        cache.put("vid", "first");
        clock.advance_secs(200);
        cache.put("vid", "second");
        clock.advance_secs(200);
        assert_eq!(cache.get("vid").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss() {
        let cache = TranscriptCache::new(Arc::new(ManualClock::at(0)));
        assert_eq!(cache.get("nothing"), None);
    }

    #[test]
    fn test_interceptor_caches_successful_caption_responses() {
        let cache = Arc::new(TranscriptCache::new(Arc::new(ManualClock::at(0))));
        let interceptor = CacheInterceptor::new(cache.clone());
        let ok = HttpResponse {
            status: 200,
            body: r#"{"events":[]}"#.to_string(),
        };
        let failed = HttpResponse {
            status: 403,
            body: "denied".to_string(),
        };

        interceptor.on_response(
            &HttpRequest::get("https://www.youtube.com/api/timedtext?v=aaaaaaaaaaa&lang=en"),
            &ok,
        );
        interceptor.on_response(
            &HttpRequest::get("https://www.youtube.com/api/timedtext?v=bbbbbbbbbbb&lang=en"),
            &failed,
        );
        interceptor.on_response(&HttpRequest::get("https://www.youtube.com/watch?v=ccccccccccc"), &ok);

        assert_eq!(cache.get("aaaaaaaaaaa").as_deref(), Some(r#"{"events":[]}"#));
        assert_eq!(cache.get("bbbbbbbbbbb"), None);
        assert_eq!(cache.get("ccccccccccc"), None);
    }
}
