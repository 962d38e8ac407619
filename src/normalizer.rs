//! Conversion of per-platform subtitle records into [`CanonicalSubtitle`].
//!
//! YouTube records (`{text, duration, offset}`) are transformed; Bilibili records
//! (`{sid, from, to, content, location}`) already have the canonical layout and are
//! only validated with per-field defaults. Canonical output serializes back to the
//! Bilibili layout, so normalizing it again is a no-op.

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{CanonicalSubtitle, TranscriptItem};

/// Position code used when a record does not carry one
pub const DEFAULT_POSITION: u32 = 2;

const SUMMARY_CONTENT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    YouTube,
    Bilibili,
    Unknown,
}

/// A loosely-typed subtitle record sorted by which fields it carries
#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleRecord<'a> {
    YouTube(&'a serde_json::Map<String, Value>),
    Bilibili(&'a serde_json::Map<String, Value>),
    Unknown(&'a Value),
}

impl<'a> SubtitleRecord<'a> {
    pub fn classify(value: &'a Value) -> Self {
        let Some(fields) = value.as_object() else {
            return SubtitleRecord::Unknown(value);
        };
        let has = |keys: &[&str]| keys.iter().all(|k| fields.contains_key(*k));
        if has(&["text", "duration", "offset"]) {
            SubtitleRecord::YouTube(fields)
        } else if has(&["content", "from", "to"]) {
            SubtitleRecord::Bilibili(fields)
        } else {
            SubtitleRecord::Unknown(value)
        }
    }

    pub fn format(&self) -> SubtitleFormat {
        match self {
            SubtitleRecord::YouTube(_) => SubtitleFormat::YouTube,
            SubtitleRecord::Bilibili(_) => SubtitleFormat::Bilibili,
            SubtitleRecord::Unknown(_) => SubtitleFormat::Unknown,
        }
    }
}

/// Format of a list, judged by its first record
pub fn detect_format(items: &[Value]) -> SubtitleFormat {
    items
        .first()
        .map(|first| SubtitleRecord::classify(first).format())
        .unwrap_or(SubtitleFormat::Unknown)
}

fn number(fields: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn text(fields: &serde_json::Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn positive_int(fields: &serde_json::Map<String, Value>, key: &str) -> Option<u32> {
    fields
        .get(key)
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
}

fn convert_youtube(fields: &serde_json::Map<String, Value>, index: usize) -> CanonicalSubtitle {
    let start = number(fields, "offset").unwrap_or(0.0).max(0.0);
    let duration = number(fields, "duration").unwrap_or(0.0).max(0.0);
    CanonicalSubtitle {
        sequence_id: index as u32 + 1,
        start,
        end: start + duration,
        text: text(fields, "text"),
        position: DEFAULT_POSITION,
    }
}

fn validate_bilibili(fields: &serde_json::Map<String, Value>, index: usize) -> CanonicalSubtitle {
    let start = number(fields, "from").unwrap_or(0.0).max(0.0);
    let end = number(fields, "to").unwrap_or(start).max(start);
    CanonicalSubtitle {
        sequence_id: positive_int(fields, "sid").unwrap_or(index as u32 + 1),
        start,
        end,
        text: text(fields, "content"),
        position: positive_int(fields, "location").unwrap_or(DEFAULT_POSITION),
    }
}

/// Convert raw records from `platform` (`"youtube"` or `"bilibili"`) into canonical form.
///
/// Records already in canonical layout are validated rather than converted, whatever the
/// platform. An unsupported platform yields an empty list.
pub fn normalize(items: &[Value], platform: &str) -> Vec<CanonicalSubtitle> {
    if items.is_empty() {
        debug!("No subtitles to normalize");
        return Vec::new();
    }

    let youtube = match platform.to_lowercase().as_str() {
        "youtube" => true,
        "bilibili" => false,
        other => {
            warn!("Unsupported subtitle platform '{other}', dropping {} records", items.len());
            return Vec::new();
        }
    };

    debug!("Normalizing {} {platform} subtitle records", items.len());
    items
        .iter()
        .enumerate()
        .map(|(index, value)| match SubtitleRecord::classify(value) {
            SubtitleRecord::YouTube(fields) => convert_youtube(fields, index),
            SubtitleRecord::Bilibili(fields) => validate_bilibili(fields, index),
            SubtitleRecord::Unknown(value) => {
                let empty = serde_json::Map::new();
                let fields = value.as_object().unwrap_or(&empty);
                if youtube {
                    convert_youtube(fields, index)
                } else {
                    validate_bilibili(fields, index)
                }
            }
        })
        .collect()
}

/// Typed path for parsed YouTube transcripts
pub fn from_transcript(items: &[TranscriptItem]) -> Vec<CanonicalSubtitle> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let start = item.start.max(0.0);
            CanonicalSubtitle {
                sequence_id: index as u32 + 1,
                start,
                end: start + item.duration.max(0.0),
                text: item.text.clone(),
                position: DEFAULT_POSITION,
            }
        })
        .collect()
}

/// Whether the first record has the exact typed shape of `platform`. Empty input is valid.
pub fn validate_format(items: &[Value], platform: &str) -> bool {
    let Some(first) = items.first() else {
        return true;
    };
    let is_str = |key: &str| first.get(key).is_some_and(Value::is_string);
    let is_num = |key: &str| first.get(key).is_some_and(Value::is_number);
    match platform.to_lowercase().as_str() {
        "youtube" => is_str("text") && is_num("duration") && is_num("offset"),
        "bilibili" => is_num("to") && is_num("from") && is_str("content") && is_num("sid"),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubtitleStats {
    pub count: usize,
    pub total_duration: f64,
    pub average_duration: f64,
    pub first: Option<CanonicalSubtitle>,
    pub last: Option<CanonicalSubtitle>,
}

pub fn stats(items: &[CanonicalSubtitle]) -> SubtitleStats {
    if items.is_empty() {
        return SubtitleStats::default();
    }
    let total_duration: f64 = items.iter().map(CanonicalSubtitle::duration).sum();
    SubtitleStats {
        count: items.len(),
        total_duration,
        average_duration: total_duration / items.len() as f64,
        first: items.first().cloned(),
        last: items.last().cloned(),
    }
}

/// `MM:SS`, or `HH:MM:SS` once there is at least an hour
pub fn format_time(seconds: f64) -> String {
    if seconds.is_nan() || seconds < 0.0 {
        return "00:00".to_string();
    }
    let total = seconds.floor() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub platform: String,
    pub original_count: usize,
    pub converted_count: usize,
    pub success: bool,
    pub total_duration: f64,
    pub average_duration: f64,
    pub first_content: String,
    pub last_content: String,
    pub format: SubtitleFormat,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

pub fn conversion_summary(original_count: usize, converted: &[CanonicalSubtitle], platform: &str) -> ConversionSummary {
    let stats = stats(converted);
    let content = |sub: &Option<CanonicalSubtitle>| {
        sub.as_ref()
            .map(|s| truncate(&s.text, SUMMARY_CONTENT_CHARS))
            .unwrap_or_default()
    };
    ConversionSummary {
        platform: platform.to_string(),
        original_count,
        converted_count: stats.count,
        success: stats.count > 0,
        total_duration: round2(stats.total_duration),
        average_duration: round2(stats.average_duration),
        first_content: content(&stats.first),
        last_content: content(&stats.last),
        format: SubtitleFormat::Bilibili,
    }
}

pub fn log_conversion_summary(original_count: usize, converted: &[CanonicalSubtitle], platform: &str) {
    let stats = stats(converted);
    info!(
        "{} subtitles: {original_count} in, {} out, total {}, average {:.2}s",
        platform.to_uppercase(),
        stats.count,
        format_time(stats.total_duration),
        stats.average_duration
    );
    for (label, sub) in [("first", &stats.first), ("last", &stats.last)] {
        if let Some(sub) = sub {
            debug!(
                "{label}: [{}-{}] {}",
                format_time(sub.start),
                format_time(sub.end),
                truncate(&sub.text, 30)
            );
        }
    }
}
