//! Extraction engine contract.
//!
//! The queue core never talks to a media site directly. It hands a URL and
//! [`FetchOptions`] to an [`ExtractionEngine`] and gets back either a final
//! artifact or an [`EngineError`]. Progress flows the other way through a
//! [`ProgressSink`], which is also where pause and cancel are enforced: every
//! report is a cooperative checkpoint.

pub mod format;
pub mod playlist;
pub mod progress;
pub mod ytdlp;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::error::EngineError;
use crate::job::{Job, JobId, JobStatus, MediaKind};
use crate::platform;

pub use ytdlp::YtDlpEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Downloading,
    Finished,
}

/// One progress report from the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub rate_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
    /// Destination file the engine is writing, when known.
    pub filename: Option<String>,
}

impl ProgressEvent {
    pub fn downloading(bytes_done: u64, bytes_total: Option<u64>) -> Self {
        Self {
            phase: ProgressPhase::Downloading,
            bytes_done,
            bytes_total,
            rate_bytes_per_sec: None,
            eta_seconds: None,
            filename: None,
        }
    }

    pub fn finished() -> Self {
        Self {
            phase: ProgressPhase::Finished,
            bytes_done: 0,
            bytes_total: None,
            rate_bytes_per_sec: None,
            eta_seconds: None,
            filename: None,
        }
    }
}

/// The subset of engine metadata the core uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub webpage_url: Option<String>,
    pub description: Option<String>,
    /// Destination the engine would write before post-processing.
    pub filename: Option<String>,
    /// Final path after post-processing, reported once the file is moved into place.
    pub filepath: Option<String>,
}

impl MediaInfo {
    /// Pick the known fields out of an engine info dictionary.
    pub fn from_value(value: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            id: text(&["id"]),
            title: text(&["title"]),
            uploader: text(&["uploader", "channel"]),
            upload_date: text(&["upload_date"]),
            webpage_url: text(&["webpage_url", "original_url"]),
            description: text(&["description"]),
            filename: text(&["filename", "_filename"]),
            filepath: text(&["filepath"]),
        }
    }
}

/// Output constraints for one probe or fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub media_kind: MediaKind,
    pub quality: String,
    pub container_format: String,
    pub output_dir: PathBuf,
    /// Replace an existing destination file instead of resuming or skipping.
    pub overwrite: bool,
}

impl FetchOptions {
    pub fn for_job(job: &Job, output_dir: PathBuf) -> Self {
        Self {
            media_kind: job.media_kind(),
            quality: job.quality().to_string(),
            container_format: job.container_format().to_string(),
            output_dir,
            overwrite: false,
        }
    }

    /// Where the finished file will land, given probe metadata.
    ///
    /// The extension is the post-processing target (merge container or
    /// extracted audio codec), not whatever the probe guessed.
    pub fn expected_path(&self, info: &MediaInfo) -> Option<PathBuf> {
        let filename = info.filename.as_deref()?;
        let ext = match self.media_kind {
            MediaKind::Video => format::video_container(&self.container_format),
            MediaKind::Audio => format::audio_codec(&self.container_format),
        };
        Some(PathBuf::from(filename).with_extension(ext))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub final_path: PathBuf,
    pub info: MediaInfo,
}

/// One entry of a flattened playlist listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatEntry {
    pub id: String,
    pub title: Option<String>,
    pub direct_url: Option<String>,
}

impl FlatEntry {
    /// URL to enqueue for this entry: the listed URL, else a watch URL built from the id.
    pub fn resolve_url(&self) -> String {
        match self.direct_url.as_deref() {
            Some(url) if url.starts_with("http") => url.to_string(),
            _ => platform::youtube_watch_url(&self.id),
        }
    }
}

/// An external capability that can inspect and download media.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Resolve metadata without downloading.
    async fn probe(&self, url: &str, options: &FetchOptions) -> Result<MediaInfo, EngineError>;

    /// Download one item, reporting through `sink`. Must return
    /// [`EngineError::Cancelled`] when a sink checkpoint says so.
    async fn fetch(&self, url: &str, options: &FetchOptions, sink: &ProgressSink) -> Result<FetchOutcome, EngineError>;

    /// Enumerate a playlist without resolving each entry.
    async fn list_flat(&self, playlist_url: &str) -> Result<Vec<FlatEntry>, EngineError>;
}

/// Progress channel from an engine back into its job.
///
/// Only the job's own worker holds one, so progress writes have a single writer.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    job: Arc<Job>,
    pause_poll: Duration,
}

impl ProgressSink {
    pub fn new(job: Arc<Job>, pause_poll: Duration) -> Self {
        Self { job, pause_poll }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// Checkpoint, then fold the event into the job.
    pub async fn report(&self, event: ProgressEvent) -> Result<(), EngineError> {
        self.checkpoint().await?;
        self.job.apply_progress(&event);
        Ok(())
    }

    /// Returns `Cancelled` if the job was cancelled; blocks while it is paused.
    ///
    /// A paused job is re-polled every `pause_poll`, so a cancel issued during
    /// the pause is seen within one interval.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        loop {
            match self.job.status() {
                JobStatus::Cancelled => return Err(EngineError::Cancelled),
                JobStatus::Paused => tokio::time::sleep(self.pause_poll).await,
                _ => return Ok(()),
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.status() == JobStatus::Cancelled
    }
}
