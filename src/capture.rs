//! Caption token capture.
//!
//! The page context observes outbound caption requests and records the `pot`
//! token they carry. It forwards each capture over a one-way bus to the
//! extension context, which keeps its own copy and answers lookups from the
//! restricted context. No store is shared between contexts; only messages cross.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::clock::Clock;
use crate::http::{HttpRequest, Interceptor};
use crate::identity;

/// Substring identifying caption endpoint requests
pub const CAPTION_ENDPOINT_MARKER: &str = "timedtext";

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionToken {
    pub video_id: String,
    pub token: String,
    pub captured_at_ms: u64,
}

/// Latest caption token per video, owned by a single context
pub struct TokenStore {
    tokens: Mutex<HashMap<String, CaptionToken>>,
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
}

impl TokenStore {
    pub fn new(clock: Arc<dyn Clock>, max_age: Option<Duration>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            clock,
            max_age,
        }
    }

    /// Stamp and store a freshly observed token, superseding any older one
    pub fn record(&self, video_id: &str, token: &str) -> CaptionToken {
        let captured = CaptionToken {
            video_id: video_id.to_string(),
            token: token.to_string(),
            captured_at_ms: self.clock.now_ms(),
        };
        self.insert(captured.clone());
        captured
    }

    pub fn insert(&self, token: CaptionToken) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.video_id.clone(), token);
    }

    pub fn get(&self, video_id: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tokens.get(video_id)?;
        if let Some(max_age) = self.max_age {
            let age = self.clock.now_ms().saturating_sub(entry.captured_at_ms);
            if age > max_age.as_millis() as u64 {
                debug!("Caption token for {video_id} is stale ({age} ms)");
                return None;
            }
        }
        Some(entry.token.clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    TokenCaptured(CaptionToken),
}

/// Fire-and-forget sending half of the cross-context bus
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl BusSender {
    pub fn send(&self, message: BusMessage) {
        if self.tx.send(message).is_err() {
            debug!("No listener on the bus, message dropped");
        }
    }
}

pub struct BusInbox {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

pub fn channel() -> (BusSender, BusInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusSender { tx }, BusInbox { rx })
}

/// Page-context hook that lifts `pot` tokens off caption requests
pub struct CaptureInterceptor {
    store: Arc<TokenStore>,
    bus: BusSender,
    page_url: RwLock<Option<String>>,
}

impl CaptureInterceptor {
    pub fn new(store: Arc<TokenStore>, bus: BusSender) -> Self {
        Self {
            store,
            bus,
            page_url: RwLock::new(None),
        }
    }

    /// URL of the page currently open in this context, used to infer a missing video id
    pub fn set_page_url(&self, url: &str) {
        *self.page_url.write().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
    }

    fn current_video_id(&self) -> Option<String> {
        let page_url = self.page_url.read().unwrap_or_else(PoisonError::into_inner);
        page_url.as_deref().and_then(|url| identity::query_param(url, "v"))
    }

    fn resolve(&self, url: &str) -> Result<Url, url::ParseError> {
        match Url::parse(url) {
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let page_url = self.page_url.read().unwrap_or_else(PoisonError::into_inner);
                let base = page_url.as_deref().ok_or(url::ParseError::RelativeUrlWithoutBase)?;
                Url::parse(base)?.join(url)
            }
            parsed => parsed,
        }
    }

    fn capture(&self, url: &str) -> Option<CaptionToken> {
        let parsed = match self.resolve(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Could not parse caption request URL {url}: {e}");
                return None;
            }
        };

        let param = |key: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };

        let token = param("pot")?;
        let video_id = match param("v") {
            Some(v) => v,
            None => {
                let inferred = self.current_video_id()?;
                debug!("Caption request carries no video id, inferred {inferred} from page URL");
                inferred
            }
        };

        let captured = self.store.record(&video_id, &token);
        info!("Captured caption token for video {video_id}");
        self.bus.send(BusMessage::TokenCaptured(captured.clone()));
        Some(captured)
    }
}

impl Interceptor for CaptureInterceptor {
    fn on_request(&self, request: &HttpRequest) {
        if request.url.contains(CAPTION_ENDPOINT_MARKER) {
            self.capture(&request.url);
        }
    }
}

struct LookupRequest {
    video_id: String,
    reply: oneshot::Sender<Option<String>>,
}

/// Extension-context owner of the relayed tokens
pub struct TokenRelay {
    store: TokenStore,
}

#[derive(Clone)]
pub struct RelayHandle {
    requests: mpsc::Sender<LookupRequest>,
}

impl TokenRelay {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// Start listening on the bus and serving lookups on a background task
    pub fn spawn(self, inbox: BusInbox) -> RelayHandle {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(self.run(inbox, rx));
        RelayHandle { requests: tx }
    }

    async fn run(self, mut inbox: BusInbox, mut requests: mpsc::Receiver<LookupRequest>) {
        let mut inbox_open = true;
        loop {
            tokio::select! {
                biased;

                message = inbox.rx.recv(), if inbox_open => match message {
                    Some(BusMessage::TokenCaptured(token)) => {
                        debug!("Relay stored caption token for video {}", token.video_id);
                        self.store.insert(token);
                    }
                    None => inbox_open = false,
                },
                request = requests.recv() => match request {
                    Some(LookupRequest { video_id, reply }) => {
                        let token = self.store.get(&video_id);
                        debug!("Relay lookup for {video_id}: {}", if token.is_some() { "found" } else { "not found" });
                        let _ = reply.send(token);
                    }
                    None => break,
                },
            }
        }
        debug!("Token relay stopped");
    }
}

/// Restricted-context view of the captured tokens
pub struct TokenLookup {
    local: Option<Arc<TokenStore>>,
    relay: Option<RelayHandle>,
    timeout: Duration,
}

impl TokenLookup {
    pub fn new(relay: Option<RelayHandle>, timeout: Duration) -> Self {
        Self {
            local: None,
            relay,
            timeout,
        }
    }

    /// Consult a same-context store before asking the relay
    pub fn with_local(mut self, store: Arc<TokenStore>) -> Self {
        self.local = Some(store);
        self
    }

    pub async fn lookup(&self, video_id: &str) -> Option<String> {
        if let Some(token) = self.local.as_ref().and_then(|store| store.get(video_id)) {
            debug!("Caption token for {video_id} found in page store");
            return Some(token);
        }

        let relay = self.relay.as_ref()?;
        let (reply, response) = oneshot::channel();
        let request = LookupRequest {
            video_id: video_id.to_string(),
            reply,
        };
        let round_trip = async {
            relay.requests.send(request).await.ok()?;
            response.await.ok().flatten()
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(token) => token,
            Err(_) => {
                warn!("Caption token lookup for {video_id} timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;

    fn store(clock: Arc<ManualClock>, max_age: Option<Duration>) -> Arc<TokenStore> {
        Arc::new(TokenStore::new(clock, max_age))
    }

    fn request(url: &str) -> HttpRequest {
        HttpRequest::get(url)
    }

    #[test]
    fn test_capture_token_and_video_id() {
        let clock = Arc::new(ManualClock::at(1_000));
        let page = store(clock, None);
        let (bus, mut inbox) = channel();
        let interceptor = CaptureInterceptor::new(page.clone(), bus);

        interceptor.on_request(&request(
            "https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&pot=TOKEN1&lang=en",
        ));

        assert_eq!(page.get("dQw4w9WgXcQ").as_deref(), Some("TOKEN1"));
        let message = inbox.rx.try_recv().unwrap();
        assert_eq!(
            message,
            BusMessage::TokenCaptured(CaptionToken {
                video_id: "dQw4w9WgXcQ".to_string(),
                token: "TOKEN1".to_string(),
                captured_at_ms: 1_000,
            })
        );
    }

    #[test]
    fn test_capture_infers_video_id_from_page() {
        let page = store(Arc::new(ManualClock::at(0)), None);
        let (bus, _inbox) = channel();
        let interceptor = CaptureInterceptor::new(page.clone(), bus);
        interceptor.set_page_url("https://www.youtube.com/watch?v=abcdefghijk");

        interceptor.on_request(&request("https://www.youtube.com/api/timedtext?pot=TOKEN2&lang=en"));

        assert_eq!(page.get("abcdefghijk").as_deref(), Some("TOKEN2"));
    }

    #[test]
    fn test_capture_resolves_relative_caption_url() {
        let page = store(Arc::new(ManualClock::at(0)), None);
        let (bus, mut inbox) = channel();
        let interceptor = CaptureInterceptor::new(page.clone(), bus);

        interceptor.on_request(&request("/api/timedtext?pot=EARLY&v=dQw4w9WgXcQ"));
        assert!(page.is_empty());

        interceptor.set_page_url("https://www.youtube.com/watch?v=abcdefghijk");
        interceptor.on_request(&request("/api/timedtext?pot=REL&v=dQw4w9WgXcQ"));
        interceptor.on_request(&request("/api/timedtext?pot=PAGE&lang=en"));

        assert_eq!(page.get("dQw4w9WgXcQ").as_deref(), Some("REL"));
        assert_eq!(page.get("abcdefghijk").as_deref(), Some("PAGE"));
        assert!(inbox.rx.try_recv().is_ok());
    }

    #[test]
    fn test_ignores_unrelated_and_tokenless_requests() {
        let page = store(Arc::new(ManualClock::at(0)), None);
        let (bus, mut inbox) = channel();
        let interceptor = CaptureInterceptor::new(page.clone(), bus);

        interceptor.on_request(&request("https://www.youtube.com/watch?v=dQw4w9WgXcQ&pot=nope"));
        interceptor.on_request(&request("https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ"));

        assert!(page.is_empty());
        assert!(inbox.rx.try_recv().is_err());
    }

    #[test]
    fn test_newer_capture_supersedes() {
        let page = store(Arc::new(ManualClock::at(0)), None);
        page.record("vid", "old");
        page.record("vid", "new");
        assert_eq!(page.get("vid").as_deref(), Some("new"));
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_stale_token_is_not_found() {
        let clock = Arc::new(ManualClock::at(0));
        let page = store(clock.clone(), Some(Duration::from_secs(60)));
        page.record("vid", "tok");
        clock.advance_secs(60);
        assert_eq!(page.get("vid").as_deref(), Some("tok"));
        clock.advance_secs(1);
        assert_eq!(page.get("vid"), None);
    }

    #[test]
    fn test_send_without_listener_is_silent() {
        let (bus, inbox) = channel();
        drop(inbox);
        bus.send(BusMessage::TokenCaptured(CaptionToken {
            video_id: "vid".to_string(),
            token: "tok".to_string(),
            captured_at_ms: 0,
        }));
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let clock = Arc::new(ManualClock::at(0));
        let page = store(clock.clone(), None);
        let (bus, inbox) = channel();
        let interceptor = CaptureInterceptor::new(page, bus);
        let relay = TokenRelay::new(TokenStore::new(clock, None)).spawn(inbox);
        let lookup = TokenLookup::new(Some(relay), Duration::from_secs(1));

        interceptor.on_request(&request("https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&pot=RELAYED"));

        assert_eq!(lookup.lookup("dQw4w9WgXcQ").await.as_deref(), Some("RELAYED"));
        assert_eq!(lookup.lookup("unknown0000").await, None);
    }

    #[tokio::test]
    async fn test_local_store_answers_first() {
        let clock = Arc::new(ManualClock::at(0));
        let page = store(clock, None);
        page.record("vid", "LOCAL");
        let lookup = TokenLookup::new(None, Duration::from_millis(10)).with_local(page);
        assert_eq!(lookup.lookup("vid").await.as_deref(), Some("LOCAL"));
    }

    #[tokio::test]
    async fn test_lookup_times_out_without_responder() {
        let (tx, _rx) = mpsc::channel(1);
        let lookup = TokenLookup::new(Some(RelayHandle { requests: tx }), Duration::from_millis(20));
        assert_eq!(lookup.lookup("vid").await, None);
    }

    #[tokio::test]
    async fn test_lookup_with_closed_relay() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let lookup = TokenLookup::new(Some(RelayHandle { requests: tx }), Duration::from_secs(5));
        assert_eq!(lookup.lookup("vid").await, None);
    }
}
