//! Download jobs and their lifecycle.
//!
//! A [`Job`] is shared between the queue and the single worker running it as
//! `Arc<Job>`. The status lives in an atomic so that user commands and the
//! worker's cooperative checkpoints never race on a plain field; progress
//! fields sit behind a per-job lock that only the owning worker writes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{ProgressEvent, ProgressPhase};
use crate::error::{QueueError, Result};
use crate::platform::{self, Platform};

/// Maximum URL length accepted for a job
pub const MAX_URL_LENGTH: usize = 4096;

/// Title shown until the engine resolves real metadata
pub const PLACEHOLDER_TITLE: &str = "Unknown";

pub const DEFAULT_QUALITY: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Container used when the request does not name one.
    pub const fn default_format(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }

    /// Folder name used in the download layout.
    pub const fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "Videos",
            MediaKind::Audio => "Audio",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(QueueError::invalid_job(format!("Invalid media kind: {other}"))),
        }
    }
}

/// Job status for queue management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobStatus {
    Queued = 0,
    /// Waiting for an explicit user start (playlist expansion items).
    Pending = 1,
    Downloading = 2,
    Paused = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl JobStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobStatus::Queued,
            1 => JobStatus::Pending,
            2 => JobStatus::Downloading,
            3 => JobStatus::Paused,
            4 => JobStatus::Completed,
            5 => JobStatus::Failed,
            _ => JobStatus::Cancelled,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// The transition table. Terminal states have no way out.
    pub const fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Downloading)
                | (Queued, Cancelled)
                | (Downloading, Paused)
                | (Downloading, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Queued)
                | (Paused, Downloading)
                | (Paused, Cancelled)
                // the engine can finish between the last checkpoint and a pause request
                | (Paused, Completed)
                | (Paused, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl From<InvalidTransition> for QueueError {
    fn from(t: InvalidTransition) -> Self {
        QueueError::invalid_transition(format!("cannot move job from {} to {}", t.from, t.to))
    }
}

/// Mutable runtime state written by the job's worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub title: String,
    pub progress_fraction: f64,
    pub transfer_rate_label: String,
    pub eta_label: String,
    pub bytes_transferred_label: String,
    pub bytes_total_label: String,
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
    pub output_path: Option<PathBuf>,
    pub last_error: Option<String>,
    /// Completed without transferring because the user kept the existing file.
    pub skipped: bool,
}

impl JobProgress {
    fn new(title: String) -> Self {
        Self {
            title,
            progress_fraction: 0.0,
            transfer_rate_label: "N/A".to_string(),
            eta_label: "N/A".to_string(),
            bytes_transferred_label: "0 B".to_string(),
            bytes_total_label: "0 B".to_string(),
            bytes_transferred: 0,
            bytes_total: None,
            output_path: None,
            last_error: None,
            skipped: false,
        }
    }
}

/// Parameters for a new job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub url: String,
    pub media_kind: MediaKind,
    pub quality: String,
    pub container_format: String,
    pub title: Option<String>,
    pub pending: bool,
}

impl JobRequest {
    pub fn new(url: impl Into<String>, media_kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            media_kind,
            quality: DEFAULT_QUALITY.to_string(),
            container_format: media_kind.default_format().to_string(),
            title: None,
            pending: false,
        }
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.container_format = format.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Start as Pending: the job waits for an explicit promote.
    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }
}

/// One requested download.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    source_url: String,
    canonical_url: String,
    media_kind: MediaKind,
    platform: Platform,
    quality: String,
    container_format: String,
    status: AtomicU8,
    progress: Mutex<JobProgress>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        let source_url = request.url.trim().to_string();
        let status = if request.pending { JobStatus::Pending } else { JobStatus::Queued };
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string());

        Self {
            id: JobId::new(),
            canonical_url: platform::canonicalize(&source_url),
            platform: platform::classify(&source_url),
            source_url,
            media_kind: request.media_kind,
            quality: request.quality,
            container_format: request.container_format,
            status: AtomicU8::new(status as u8),
            progress: Mutex::new(JobProgress::new(title)),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn container_format(&self) -> &str {
        &self.container_format
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move to `next` if the state machine allows it from the current status.
    /// Returns the previous status.
    pub fn transition(&self, next: JobStatus) -> std::result::Result<JobStatus, InvalidTransition> {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let from = JobStatus::from_u8(current);
            if !from.can_transition_to(next) {
                return Err(InvalidTransition { from, to: next });
            }
            match self.status.compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }

    /// Structural well-formedness checked before a job enters the queue.
    pub fn validate(&self) -> Result<()> {
        let url = self.source_url.as_str();
        if url.is_empty() {
            return Err(QueueError::invalid_url("URL cannot be empty"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(QueueError::invalid_url("URL must start with http:// or https://"));
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(QueueError::invalid_url(format!("URL is too long (max {} characters)", MAX_URL_LENGTH)));
        }
        if !matches!(self.status(), JobStatus::Queued | JobStatus::Pending) {
            return Err(QueueError::invalid_job(format!("new jobs must be queued or pending, not {}", self.status())));
        }
        Ok(())
    }

    fn progress(&self) -> MutexGuard<'_, JobProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn title(&self) -> String {
        self.progress().title.clone()
    }

    pub fn has_placeholder_title(&self) -> bool {
        let progress = self.progress();
        progress.title.is_empty() || progress.title == PLACEHOLDER_TITLE
    }

    pub fn set_title(&self, title: &str) {
        if !title.trim().is_empty() {
            self.progress().title = title.to_string();
        }
    }

    /// Fold one engine progress event into the job's progress fields.
    pub fn apply_progress(&self, event: &ProgressEvent) {
        let mut progress = self.progress();
        match event.phase {
            ProgressPhase::Downloading => {
                if (progress.title.is_empty() || progress.title == PLACEHOLDER_TITLE)
                    && let Some(stem) = event.filename.as_deref().and_then(file_stem)
                {
                    progress.title = stem;
                }

                let total = event.bytes_total.filter(|t| *t > 0);
                if let Some(total) = total {
                    progress.progress_fraction = (event.bytes_done as f64 / total as f64).clamp(0.0, 1.0);
                    progress.bytes_total = Some(total);
                    progress.bytes_total_label = format_megabytes(total);
                }
                progress.bytes_transferred = event.bytes_done;
                progress.bytes_transferred_label = format_megabytes(event.bytes_done);
                progress.transfer_rate_label = format_rate(event.rate_bytes_per_sec);
                progress.eta_label = format_eta(event.eta_seconds);
            }
            ProgressPhase::Finished => {
                progress.progress_fraction = 1.0;
            }
        }
    }

    pub fn set_output_path(&self, path: PathBuf) {
        self.progress().output_path = Some(path);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.progress().last_error = Some(message.into());
    }

    /// Completed-with-skip: the destination already existed and was kept.
    pub fn mark_skipped(&self) -> std::result::Result<JobStatus, InvalidTransition> {
        let previous = self.transition(JobStatus::Completed)?;
        let mut progress = self.progress();
        progress.skipped = true;
        progress.progress_fraction = 1.0;
        progress.bytes_transferred_label = "Skipped".to_string();
        Ok(previous)
    }

    /// Value copy of the job for readers outside the worker.
    pub fn snapshot(&self) -> JobSnapshot {
        let progress = self.progress().clone();
        JobSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            canonical_url: self.canonical_url.clone(),
            media_kind: self.media_kind,
            platform: self.platform,
            quality: self.quality.clone(),
            container_format: self.container_format.clone(),
            status: self.status(),
            progress,
        }
    }
}

/// Immutable copy of a job at one instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub source_url: String,
    pub canonical_url: String,
    pub media_kind: MediaKind,
    pub platform: Platform,
    pub quality: String,
    pub container_format: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub progress: JobProgress,
}

fn file_stem(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
}

const MIB: f64 = 1024.0 * 1024.0;

pub fn format_megabytes(bytes: u64) -> String {
    if bytes as f64 > MIB {
        format!("{:.1} MB", bytes as f64 / MIB)
    } else {
        "0 MB".to_string()
    }
}

pub fn format_rate(rate_bytes_per_sec: Option<f64>) -> String {
    match rate_bytes_per_sec {
        Some(rate) if rate > 0.0 => format!("{:.2} MB/s", rate / MIB),
        _ => "0.0 MB/s".to_string(),
    }
}

pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(eta) if eta > 0 => format!("{:02}:{:02}", eta / 60, eta % 60),
        _ => "--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(url: &str) -> Job {
        Job::new(JobRequest::new(url, MediaKind::Video))
    }

    fn downloading(bytes_done: u64, bytes_total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            phase: ProgressPhase::Downloading,
            bytes_done,
            bytes_total,
            rate_bytes_per_sec: Some(2.0 * MIB),
            eta_seconds: Some(75),
            filename: Some("/tmp/out/My Clip.mp4".to_string()),
        }
    }

    #[test]
    fn test_new_job_derives_platform_and_canonical_url() {
        let job = job(" https://youtu.be/dQw4w9WgXcQ ");
        assert_eq!(job.platform(), Platform::Youtube);
        assert_eq!(job.source_url(), "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(job.canonical_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.title(), PLACEHOLDER_TITLE);
        assert_eq!(job.container_format(), "mp4");
    }

    #[test]
    fn test_request_builder() {
        let job = Job::new(
            JobRequest::new("https://www.tiktok.com/@a/video/1", MediaKind::Audio)
                .quality("720p")
                .title("Song")
                .pending(true),
        );
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.container_format(), "mp3");
        assert_eq!(job.quality(), "720p");
        assert_eq!(job.title(), "Song");
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let job = job("https://example.com/v");
        assert_eq!(job.transition(JobStatus::Downloading), Ok(JobStatus::Queued));
        assert_eq!(job.transition(JobStatus::Paused), Ok(JobStatus::Downloading));
        assert_eq!(job.transition(JobStatus::Downloading), Ok(JobStatus::Paused));
        assert_eq!(job.transition(JobStatus::Completed), Ok(JobStatus::Downloading));
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Queued,
                JobStatus::Pending,
                JobStatus::Downloading,
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next} must be rejected");
            }
        }

        let job = job("https://example.com/v");
        job.transition(JobStatus::Cancelled).unwrap();
        let err = job.transition(JobStatus::Downloading).unwrap_err();
        assert_eq!(err, InvalidTransition { from: JobStatus::Cancelled, to: JobStatus::Downloading });
    }

    #[test]
    fn test_pending_must_be_promoted_before_download() {
        let job = Job::new(JobRequest::new("https://example.com/v", MediaKind::Video).pending(true));
        assert!(job.transition(JobStatus::Downloading).is_err());
        job.transition(JobStatus::Queued).unwrap();
        job.transition(JobStatus::Downloading).unwrap();
    }

    #[test]
    fn test_validate() {
        assert!(job("https://example.com/v").validate().is_ok());
        assert!(job("").validate().is_err());
        assert!(job("ftp://example.com/v").validate().is_err());
        let long = format!("https://example.com/{}", "x".repeat(MAX_URL_LENGTH));
        assert!(job(&long).validate().is_err());

        let started = job("https://example.com/v");
        started.transition(JobStatus::Downloading).unwrap();
        assert!(started.validate().is_err());
    }

    #[test]
    fn test_apply_progress_updates_labels_and_title() {
        let job = job("https://example.com/v");
        job.apply_progress(&downloading(5 * 1024 * 1024, Some(10 * 1024 * 1024)));

        let snap = job.snapshot();
        assert_eq!(snap.progress.progress_fraction, 0.5);
        assert_eq!(snap.progress.bytes_transferred_label, "5.0 MB");
        assert_eq!(snap.progress.bytes_total_label, "10.0 MB");
        assert_eq!(snap.progress.transfer_rate_label, "2.00 MB/s");
        assert_eq!(snap.progress.eta_label, "01:15");
        assert_eq!(snap.progress.title, "My Clip");
    }

    #[test]
    fn test_apply_progress_keeps_resolved_title_and_unknown_total() {
        let job = Job::new(JobRequest::new("https://example.com/v", MediaKind::Video).title("Real"));
        job.apply_progress(&downloading(100, None));
        let snap = job.snapshot();
        assert_eq!(snap.progress.title, "Real");
        assert_eq!(snap.progress.progress_fraction, 0.0);
        assert_eq!(snap.progress.bytes_transferred_label, "0 MB");

        job.apply_progress(&ProgressEvent::finished());
        assert_eq!(job.snapshot().progress.progress_fraction, 1.0);
    }

    #[test]
    fn test_mark_skipped() {
        let job = job("https://example.com/v");
        job.transition(JobStatus::Downloading).unwrap();
        job.mark_skipped().unwrap();
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert!(snap.progress.skipped);
        assert_eq!(snap.progress.bytes_transferred_label, "Skipped");
        assert!(snap.progress.last_error.is_none());
    }

    #[test]
    fn test_label_formatting() {
        assert_eq!(format_eta(None), "--:--");
        assert_eq!(format_eta(Some(3599)), "59:59");
        assert_eq!(format_rate(None), "0.0 MB/s");
        assert_eq!(format_megabytes(1024), "0 MB");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let job = job("https://www.facebook.com/watch/?v=1");
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["platform"], "facebook");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["mediaKind"], "video");
        assert!(json.get("progressFraction").is_some());
        assert!(json.get("lastError").is_some());
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("Audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert!("podcast".parse::<MediaKind>().is_err());
    }
}
