//! Quality and container selection for yt-dlp.

use std::path::{MAIN_SEPARATOR, Path};

use crate::job::MediaKind;

const VIDEO_CONTAINERS: &[&str] = &["mp4", "mkv", "webm", "3gp"];
const AUDIO_CODECS: &[&str] = &["mp3", "m4a", "wav"];

/// kbps passed to the audio extractor
pub const AUDIO_QUALITY: &str = "192K";

/// Retry budget handed to the engine for whole requests and for fragments.
pub const ENGINE_RETRIES: u32 = 10;

/// Requested video container, or mp4 when it is not one we can merge into.
pub fn video_container(format: &str) -> &str {
    VIDEO_CONTAINERS.iter().copied().find(|c| *c == format).unwrap_or("mp4")
}

/// Requested audio codec, or mp3 when unsupported.
pub fn audio_codec(format: &str) -> &str {
    AUDIO_CODECS.iter().copied().find(|c| *c == format).unwrap_or("mp3")
}

/// yt-dlp `-f` selector for a video quality label and container.
///
/// `4k` asks for at least 2160 lines; the `NNNp` labels cap the height;
/// anything else takes the best available stream.
pub fn video_selector(quality: &str, container: &str) -> String {
    let height_filter = match quality {
        "4k" => Some(">=2160"),
        "1080p" => Some("<=1080"),
        "720p" => Some("<=720"),
        "480p" => Some("<=480"),
        "240p" => Some("<=240"),
        "144p" => Some("<=144"),
        _ => None,
    };

    match height_filter {
        Some(h) => format!("bestvideo[height{h}][ext={container}]+bestaudio/best[height{h}][ext={container}]/best"),
        None => format!("bestvideo[ext={container}]+bestaudio/best[ext={container}]/best"),
    }
}

/// Build the format selection arguments for one job.
pub fn build_format_args(kind: MediaKind, quality: &str, format: &str) -> Vec<String> {
    let mut args = Vec::new();

    match kind {
        MediaKind::Video => {
            let container = video_container(format);
            args.push("-f".to_string());
            args.push(video_selector(quality, container));
            args.push("--merge-output-format".to_string());
            args.push(container.to_string());
        }
        MediaKind::Audio => {
            args.push("-f".to_string());
            args.push("bestaudio/best".to_string());
            args.push("--extract-audio".to_string());
            args.push("--audio-format".to_string());
            args.push(audio_codec(format).to_string());
            args.push("--audio-quality".to_string());
            args.push(AUDIO_QUALITY.to_string());
        }
    }

    args
}

/// Retry arguments shared by every download.
pub fn build_retry_args() -> Vec<String> {
    vec![
        "--retries".to_string(),
        ENGINE_RETRIES.to_string(),
        "--fragment-retries".to_string(),
        ENGINE_RETRIES.to_string(),
    ]
}

/// `{dir}/%(title)s.%(ext)s`
pub fn output_template(dir: &Path) -> String {
    format!("{}{}%(title)s.%(ext)s", dir.display(), MAIN_SEPARATOR)
}
