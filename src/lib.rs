pub mod bilibili;
pub mod cache;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod identity;
pub mod normalizer;
pub mod output;
pub mod storage;
pub mod submit;
pub mod youtube;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{Result, SubgrabError};
pub use identity::resolve_identity;

/// Video platform a page belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Bilibili,
}

impl Platform {
    /// Tag used by the subtitle normalizer and the backend
    pub fn tag(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Bilibili => "bilibili",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Platform plus canonical video id, derived once per page visit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VideoIdentity {
    pub platform: Platform,
    pub id: String,
}

/// A single timed transcript line.
///
/// Serializes as `{text, duration, offset, lang}`, which is also the per-item
/// shape the backend accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub text: String,
    #[serde(rename = "offset")]
    pub start: f64,
    pub duration: f64,
    pub lang: String,
}

/// Unified subtitle record, serialized in the Bilibili shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSubtitle {
    #[serde(rename = "sid")]
    pub sequence_id: u32,
    #[serde(rename = "from")]
    pub start: f64,
    #[serde(rename = "to")]
    pub end: f64,
    #[serde(rename = "content")]
    pub text: String,
    #[serde(rename = "location")]
    pub position: u32,
}

impl CanonicalSubtitle {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Descriptive metadata for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub platform: Platform,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<u64>,
    pub uploader_name: Option<String>,
    pub uploader_id: Option<String>,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Subtitle section of an extraction bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleBlock {
    pub title: String,
    pub language: String,
    pub language_code: String,
    pub items: Vec<CanonicalSubtitle>,
}

impl SubtitleBlock {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything extracted from one page visit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionBundle {
    pub metadata: VideoMetadata,
    pub subtitles: SubtitleBlock,
    pub extracted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_item_wire_names() {
        let item = TranscriptItem {
            text: "Hello".to_string(),
            start: 1.0,
            duration: 2.0,
            lang: "en".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["offset"], 1.0);
        assert_eq!(json["duration"], 2.0);
        assert_eq!(json["text"], "Hello");
        assert_eq!(json["lang"], "en");
    }

    #[test]
    fn test_canonical_subtitle_wire_names() {
        let sub = CanonicalSubtitle {
            sequence_id: 1,
            start: 3.0,
            end: 5.0,
            text: "x".to_string(),
            position: 2,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["sid"], 1);
        assert_eq!(json["from"], 3.0);
        assert_eq!(json["to"], 5.0);
        assert_eq!(json["content"], "x");
        assert_eq!(json["location"], 2);
        assert!((sub.duration() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::YouTube.to_string(), "youtube");
        assert_eq!(Platform::Bilibili.to_string(), "bilibili");
    }
}
