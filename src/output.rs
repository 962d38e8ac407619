use crate::ExtractionBundle;
use crate::normalizer::format_time;

/// Render subtitles as plain text, one `[MM:SS] line` per subtitle
pub fn render_text(bundle: &ExtractionBundle) -> String {
    bundle
        .subtitles
        .items
        .iter()
        .map(|s| format!("[{}] {}", format_time(s.start), s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_json(bundle: &ExtractionBundle) -> serde_json::Result<String> {
    serde_json::to_string_pretty(bundle)
}

fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (hours, minutes, secs, ms) = (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000,
    );
    format!("{hours:02}:{minutes:02}:{secs:02},{ms:03}")
}

pub fn render_srt(bundle: &ExtractionBundle) -> String {
    bundle
        .subtitles
        .items
        .iter()
        .map(|s| {
            format!(
                "{}\n{} --> {}\n{}\n",
                s.sequence_id,
                srt_timestamp(s.start),
                srt_timestamp(s.end),
                s.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
