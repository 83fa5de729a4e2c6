//! Progress parsing utilities for yt-dlp output.

use super::{ProgressEvent, ProgressPhase};

/// Marker placed at the start of every templated progress line.
pub const PROGRESS_MARKER: &str = "mediaqueue|";

/// Marker for the post-move info JSON line.
pub const INFO_MARKER: &str = "mediaqueue-info|";

/// `--progress-template` value. Fields are `|`-separated; the filename is last
/// because it is the only field that may itself contain `|`.
pub const PROGRESS_TEMPLATE: &str = "download:mediaqueue|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s|%(progress.filename)s";

/// `--print` value emitting the final info dictionary once the file is in place.
pub const INFO_PRINT_TEMPLATE: &str = "after_move:mediaqueue-info|%()j";

fn field<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse().ok()
}

/// Parse one templated progress line.
/// Returns None if the line is not a progress line or its status is unknown.
///
/// The marker is searched anywhere in the line to be resilient to prefixes.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let idx = line.find(PROGRESS_MARKER)?;
    let mut parts = line[idx + PROGRESS_MARKER.len()..].splitn(7, '|');

    let phase = match parts.next()?.trim() {
        "downloading" => ProgressPhase::Downloading,
        "finished" => ProgressPhase::Finished,
        _ => return None,
    };

    let bytes_done = parts.next().and_then(field::<f64>).map(|b| b.max(0.0) as u64).unwrap_or(0);
    let total = parts.next().and_then(field::<f64>);
    let estimate = parts.next().and_then(field::<f64>);
    let rate_bytes_per_sec = parts.next().and_then(field::<f64>).filter(|r| *r >= 0.0);
    let eta_seconds = parts.next().and_then(field::<f64>).filter(|e| *e >= 0.0).map(|e| e as u64);
    let filename = parts.next().map(str::trim).filter(|f| !f.is_empty() && *f != "NA").map(str::to_string);

    Some(ProgressEvent {
        phase,
        bytes_done,
        bytes_total: total.or(estimate).filter(|t| *t > 0.0).map(|t| t as u64),
        rate_bytes_per_sec,
        eta_seconds,
        filename,
    })
}

/// Extract the info JSON payload from a `--print` line.
pub fn parse_info_line(line: &str) -> Option<&str> {
    let idx = line.find(INFO_MARKER)?;
    Some(line[idx + INFO_MARKER.len()..].trim())
}

/// Whether a stderr line is worth persisting to the engine log.
/// Keeps errors, warnings and failures only.
pub fn should_log_stderr(line: &str) -> bool {
    let line_lower = line.to_lowercase();
    line_lower.contains("error") || line_lower.contains("warning") || line_lower.contains("failed")
}
