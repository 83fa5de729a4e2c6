//! Source platform classification and URL canonicalization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Facebook,
    Tiktok,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::Youtube, Platform::Facebook, Platform::Tiktok, Platform::Other];

    /// Stable lowercase tag used in persisted documents.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Facebook => "facebook",
            Platform::Tiktok => "tiktok",
            Platform::Other => "other",
        }
    }

    /// Folder name used in the download layout.
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Facebook => "Facebook",
            Platform::Tiktok => "TikTok",
            Platform::Other => "Other",
        }
    }

    const fn host_fragments(&self) -> &'static [&'static str] {
        match self {
            Platform::Youtube => &["youtube.com", "youtu.be", "m.youtube.com"],
            Platform::Facebook => &["facebook.com", "fb.com", "fb.watch"],
            Platform::Tiktok => &["tiktok.com"],
            Platform::Other => &[],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a URL to its source platform by case-insensitive host fragment match.
pub fn classify(url: &str) -> Platform {
    let url_lower = url.to_lowercase();
    [Platform::Youtube, Platform::Facebook, Platform::Tiktok]
        .into_iter()
        .find(|platform| platform.host_fragments().iter().any(|fragment| url_lower.contains(fragment)))
        .unwrap_or(Platform::Other)
}

/// Whether the URL carries a playlist parameter.
pub fn is_playlist_url(url: &str) -> bool {
    url.contains("list=")
}

// watch, short-link, embed, legacy /v/ and shorts shapes
static YOUTUBE_ID_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/|youtube\.com/shorts/)([a-zA-Z0-9_-]{11})",
    )
    .ok()
});

/// Extract the 11-character YouTube video id from any known URL shape.
pub fn youtube_video_id(url: &str) -> Option<String> {
    let re = YOUTUBE_ID_RE.as_ref()?;
    re.captures(url).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

/// Canonical watch URL for a YouTube video id.
pub fn youtube_watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Normalize a request URL.
///
/// YouTube video URLs without a playlist parameter are rewritten to the
/// canonical watch form; everything else passes through trimmed.
/// Never fails: unmatched input is returned as-is.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    if is_playlist_url(url) {
        return url.to_string();
    }

    match youtube_video_id(url) {
        Some(id) => youtube_watch_url(&id),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_hosts() {
        assert_eq!(classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Platform::Youtube);
        assert_eq!(classify("https://youtu.be/dQw4w9WgXcQ"), Platform::Youtube);
        assert_eq!(classify("https://M.YOUTUBE.COM/watch?v=dQw4w9WgXcQ"), Platform::Youtube);
        assert_eq!(classify("https://www.facebook.com/watch/?v=123"), Platform::Facebook);
        assert_eq!(classify("https://fb.watch/abc/"), Platform::Facebook);
        assert_eq!(classify("https://www.tiktok.com/@user/video/123"), Platform::Tiktok);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify("https://vimeo.com/123"), Platform::Other);
        assert_eq!(classify(""), Platform::Other);
        assert_eq!(classify("not a url"), Platform::Other);
    }

    #[test]
    fn test_canonicalize_known_shapes() {
        let expected = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(canonicalize("https://youtu.be/dQw4w9WgXcQ"), expected);
        assert_eq!(canonicalize("https://www.youtube.com/embed/dQw4w9WgXcQ"), expected);
        assert_eq!(canonicalize("https://www.youtube.com/shorts/dQw4w9WgXcQ"), expected);
        assert_eq!(canonicalize("https://www.youtube.com/v/dQw4w9WgXcQ"), expected);
        assert_eq!(canonicalize("  https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s "), expected);
        assert_eq!(canonicalize("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"), expected);
    }

    #[test]
    fn test_canonicalize_passes_through_playlists_and_unknown() {
        let playlist = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1234567890";
        assert_eq!(canonicalize(playlist), playlist);

        let other = "https://vimeo.com/123456";
        assert_eq!(canonicalize(other), other);

        let short_id = "https://youtu.be/abc";
        assert_eq!(canonicalize(short_id), short_id);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            "https://youtu.be/dQw4w9WgXcQ?si=xyz",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/playlist?list=PL123",
            " https://www.tiktok.com/@user/video/123 ",
            "garbage",
            "",
        ];
        for input in inputs {
            let once = canonicalize(input);
            assert_eq!(canonicalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_is_playlist_url() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::Tiktok.dir_name(), "TikTok");
        assert_eq!(Platform::Youtube.to_string(), "youtube");
        assert_eq!(serde_json::to_string(&Platform::Facebook).unwrap(), "\"facebook\"");
    }
}
