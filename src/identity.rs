use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{Platform, Result, SubgrabError, VideoIdentity};

static YOUTUBE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").unwrap());

static YOUTUBE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(?:embed|v|shorts)/([a-zA-Z0-9_-]{11})(?:[/?#]|$)").unwrap());

static BILIBILI_BVID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/video/(BV[a-zA-Z0-9]+)").unwrap());

static BILIBILI_AID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/video/av(\d+)").unwrap());

/// Map a page URL (or a bare YouTube id) to its platform and canonical video id.
///
/// YouTube ids come from `?v=`, `/embed/`, `/v/`, `/shorts/` or `youtu.be/`.
/// Bilibili ids are either `BV…` or `av<digits>`, the latter kept with its prefix.
pub fn resolve_identity(input: &str) -> Result<VideoIdentity> {
    let input = input.trim();

    // Bare 11-character video ID
    if YOUTUBE_ID.is_match(input) {
        return Ok(VideoIdentity {
            platform: Platform::YouTube,
            id: input.to_string(),
        });
    }

    let url = parse_loose(input).ok_or_else(|| SubgrabError::UnsupportedPlatform {
        input: input.to_string(),
    })?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

    if is_youtube_host(&host) {
        return youtube_id(&url, &host)
            .map(|id| VideoIdentity {
                platform: Platform::YouTube,
                id,
            })
            .ok_or_else(|| SubgrabError::InvalidVideoIdentifier {
                input: input.to_string(),
            });
    }

    if is_bilibili_host(&host) {
        return bilibili_id(url.path())
            .map(|id| VideoIdentity {
                platform: Platform::Bilibili,
                id,
            })
            .ok_or_else(|| SubgrabError::InvalidVideoIdentifier {
                input: input.to_string(),
            });
    }

    Err(SubgrabError::UnsupportedPlatform {
        input: input.to_string(),
    })
}

/// Value of a query parameter on a page URL, if the URL parses and carries it
pub fn query_param(page_url: &str, key: &str) -> Option<String> {
    let url = parse_loose(page_url)?;
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn parse_loose(input: &str) -> Option<Url> {
    match Url::parse(input) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{input}")).ok(),
        Err(_) => None,
    }
}

fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be" || host == "www.youtu.be"
}

fn is_bilibili_host(host: &str) -> bool {
    host == "bilibili.com" || host.ends_with(".bilibili.com")
}

fn youtube_id(url: &Url, host: &str) -> Option<String> {
    // youtu.be/ID
    if host.ends_with("youtu.be") {
        return url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|id| YOUTUBE_ID.is_match(id))
            .map(str::to_string);
    }

    // youtube.com/watch?v=ID
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        if YOUTUBE_ID.is_match(&v) {
            return Some(v.into_owned());
        }
    }

    // youtube.com/embed/ID, /v/ID, /shorts/ID
    YOUTUBE_PATH
        .captures(url.path())
        .map(|caps| caps[1].to_string())
}

fn bilibili_id(path: &str) -> Option<String> {
    if let Some(caps) = BILIBILI_BVID.captures(path) {
        return Some(caps[1].to_string());
    }
    BILIBILI_AID.captures(path).map(|caps| format!("av{}", &caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn youtube(id: &str) -> VideoIdentity {
        VideoIdentity {
            platform: Platform::YouTube,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_bare_video_id() {
        assert_eq!(resolve_identity("dQw4w9WgXcQ").unwrap(), youtube("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(
            resolve_identity("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            youtube("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_watch_url_with_extra_params() {
        assert_eq!(
            resolve_identity("https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ&t=120").unwrap(),
            youtube("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_every_youtube_shape_yields_same_id() {
        let shapes = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "youtu.be/dQw4w9WgXcQ?t=42",
        ];
        for shape in shapes {
            assert_eq!(resolve_identity(shape).unwrap(), youtube("dQw4w9WgXcQ"), "{shape}");
        }
    }

    #[test]
    fn test_shorts_url() {
        assert_eq!(
            resolve_identity("https://www.youtube.com/shorts/dQw4w9WgXcQ").unwrap(),
            youtube("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_youtube_without_id() {
        let err = resolve_identity("https://www.youtube.com/feed/subscriptions").unwrap_err();
        assert!(matches!(err, SubgrabError::InvalidVideoIdentifier { .. }));
    }

    #[test]
    fn test_bilibili_bvid() {
        let identity = resolve_identity("https://www.bilibili.com/video/BV1xx411c7mD?p=2").unwrap();
        assert_eq!(identity.platform, Platform::Bilibili);
        assert_eq!(identity.id, "BV1xx411c7mD");
    }

    #[test]
    fn test_bilibili_aid() {
        let identity = resolve_identity("https://www.bilibili.com/video/av170001/").unwrap();
        assert_eq!(identity.platform, Platform::Bilibili);
        assert_eq!(identity.id, "av170001");
    }

    #[test]
    fn test_bilibili_non_video_page() {
        let err = resolve_identity("https://www.bilibili.com/anime/").unwrap_err();
        assert!(matches!(err, SubgrabError::InvalidVideoIdentifier { .. }));
    }

    #[test]
    fn test_unsupported_platform() {
        let err = resolve_identity("https://vimeo.com/123456").unwrap_err();
        assert!(matches!(err, SubgrabError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn test_invalid_input() {
        assert!(resolve_identity("not-a-valid-id").is_err());
        assert!(resolve_identity("").is_err());
    }

    #[test]
    fn test_whitespace_trimming() {
        assert_eq!(resolve_identity("  dQw4w9WgXcQ  ").unwrap(), youtube("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param("https://www.bilibili.com/video/BV1xx411c7mD?p=3", "p").as_deref(),
            Some("3")
        );
        assert_eq!(query_param("https://www.youtube.com/watch?v=", "v"), None);
        assert_eq!(query_param("https://www.youtube.com/", "v"), None);
    }
}
