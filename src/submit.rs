use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{HttpClient, HttpRequest};
use crate::normalizer;
use crate::storage::KeyValueStore;
use crate::{CanonicalSubtitle, ExtractionBundle, Result, SubgrabError, TranscriptItem};

pub const BACKEND_URL_KEY: &str = "backendUrl";
pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8096";

const API_PREFIX: &str = "/api/v1";
const OPERATION_TYPE: &str = "submit_from_extension";

/// Normalize a configured backend URL so it ends in exactly one `/api/v1`
pub fn api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/');
    while let Some(stripped) = base.strip_suffix(API_PREFIX) {
        base = stripped.trim_end_matches('/');
    }
    format!("{base}{API_PREFIX}")
}

/// Canonical subtitles in the backend's per-item shape
pub fn to_wire(subtitles: &[CanonicalSubtitle], lang: &str) -> Vec<TranscriptItem> {
    subtitles
        .iter()
        .map(|sub| TranscriptItem {
            text: sub.text.clone(),
            start: sub.start,
            duration: sub.duration(),
            lang: lang.to_string(),
        })
        .collect()
}

pub fn from_wire(items: &[TranscriptItem]) -> Vec<CanonicalSubtitle> {
    normalizer::from_transcript(items)
}

fn iso(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub url: String,
    pub title: String,
    pub description: String,
    pub operation_type: String,
    pub subtitles: Vec<TranscriptItem>,
    pub playlist_id: String,
    pub timestamp: String,
    pub saved_at: String,
}

impl SubmissionPayload {
    pub fn from_bundle(bundle: &ExtractionBundle, saved_at: DateTime<Utc>) -> Self {
        let metadata = &bundle.metadata;
        Self {
            url: metadata.url.clone(),
            title: metadata.title.clone(),
            description: metadata.description.clone().unwrap_or_default(),
            operation_type: OPERATION_TYPE.to_string(),
            subtitles: to_wire(&bundle.subtitles.items, &bundle.subtitles.language_code),
            playlist_id: String::new(),
            timestamp: iso(&bundle.extracted_at),
            saved_at: iso(&saved_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub message: String,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendResponse {
    success: Option<bool>,
    message: Option<String>,
    data: Option<Value>,
}

/// Destination for finished bundles. One attempt per call.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt>;
}

pub struct BackendSink {
    http: HttpClient,
    base: String,
    auth_token: Option<String>,
}

impl BackendSink {
    pub fn new(http: HttpClient, backend_url: &str, auth_token: Option<String>) -> Self {
        Self {
            http,
            base: api_base(backend_url),
            auth_token,
        }
    }

    /// Read `backendUrl` and `authToken` from the store
    pub fn from_store(http: HttpClient, store: &dyn KeyValueStore) -> Self {
        let backend_url = store
            .get(BACKEND_URL_KEY)
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let auth_token = store.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty());
        Self::new(http, &backend_url, auth_token)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/submit", self.base)
    }
}

#[async_trait]
impl SubmissionSink for BackendSink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let body = serde_json::to_value(payload)?;
        let mut request = HttpRequest::post_json(self.endpoint(), &body);
        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        info!("Submitting '{}' with {} subtitles", payload.title, payload.subtitles.len());
        let response = self.http.send(request).await?;
        if !response.is_success() {
            warn!("Backend rejected submission with HTTP {}", response.status);
            return Err(SubgrabError::SubmissionFailed(format!("HTTP {}", response.status)));
        }

        let reply: BackendResponse = serde_json::from_str(&response.body)?;
        if reply.success != Some(true) {
            return Err(SubgrabError::SubmissionFailed(
                reply.message.unwrap_or_else(|| "submission rejected".to_string()),
            ));
        }
        let id = reply.data.as_ref().and_then(|d| d.get("id")).and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Ok(SubmissionReceipt {
            message: reply.message.unwrap_or_else(|| "submitted".to_string()),
            id,
        })
    }
}
