use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubgrabError {
    #[error("unsupported video platform: {input}")]
    UnsupportedPlatform { input: String },

    #[error("could not extract a video id from: {input}")]
    InvalidVideoIdentifier { input: String },

    #[error("YouTube is receiving too many requests from this IP and now requires solving a captcha to continue")]
    TooManyRequests,

    #[error("the video is no longer available ({video_id})")]
    VideoUnavailable { video_id: String },

    #[error("transcripts are disabled on this video ({video_id})")]
    TranscriptsDisabled { video_id: String },

    #[error(
        "no transcripts are available in {lang} for this video ({video_id}); available languages: {}",
        .available.join(", ")
    )]
    LanguageNotAvailable {
        lang: String,
        video_id: String,
        available: Vec<String>,
    },

    #[error("no transcript could be fetched for this video ({video_id}): HTTP {status}")]
    TranscriptNotAvailable { video_id: String, status: u16 },

    #[error("received an HTML page instead of transcript data for {video_id}")]
    UnexpectedHtmlResponse { video_id: String },

    #[error("unable to parse transcript response for {video_id}: {reason}")]
    UnparseableTranscript { video_id: String, reason: String },

    #[error("metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    #[error("could not resolve aid/cid for {video_id}")]
    MissingPageIdentifiers { video_id: String },

    #[error("subtitle fetch failed: {0}")]
    SubtitleFetchFailed(String),

    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl SubgrabError {
    /// Failures the orchestrator recovers from by returning empty subtitles
    pub fn is_transcript_failure(&self) -> bool {
        !matches!(
            self,
            SubgrabError::UnsupportedPlatform { .. }
                | SubgrabError::InvalidVideoIdentifier { .. }
                | SubgrabError::MetadataFetchFailed(_)
                | SubgrabError::MissingPageIdentifiers { .. }
                | SubgrabError::SubmissionFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SubgrabError>;
