//! Playlist monitoring: re-list saved playlists and enqueue entries not seen before.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{QueueError, Result};
use crate::job::{JobRequest, MediaKind};
use crate::logging::{ErrorCategory, log_info_with_context, log_warning_with_context};
use crate::queue::QueueManager;
use crate::store;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Title given to monitored entries the listing did not name.
const FALLBACK_ENTRY_TITLE: &str = "Monitor Auto";

fn now() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredPlaylist {
    pub title: String,
    pub url: String,
    pub added_date: String,
    /// Entry ids already enqueued. Only ever grows.
    #[serde(default)]
    pub downloaded_videos: Vec<String>,
    #[serde(default)]
    pub last_check: Option<String>,
}

/// `monitored_playlists.json`: playlist URL -> record.
pub type MonitoredPlaylists = BTreeMap<String, MonitoredPlaylist>;

/// Result of one [`PlaylistMonitor::check_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub checked: usize,
    pub failed: usize,
    pub enqueued: usize,
}

pub struct PlaylistMonitor {
    path: PathBuf,
    queue: QueueManager,
    /// Serializes read-modify-write of the document, including across engine calls.
    lock: tokio::sync::Mutex<()>,
}

impl PlaylistMonitor {
    pub fn new(path: impl Into<PathBuf>, queue: QueueManager) -> Self {
        Self {
            path: path.into(),
            queue,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    fn load(&self) -> MonitoredPlaylists {
        store::load_json_or_default(&self.path)
    }

    /// Start monitoring `url`. Re-adding a URL resets its record.
    pub async fn add(&self, url: &str, title: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(QueueError::invalid_url("Playlist URL cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        doc.insert(
            url.to_string(),
            MonitoredPlaylist {
                title: title.to_string(),
                url: url.to_string(),
                added_date: now(),
                downloaded_videos: Vec::new(),
                last_check: None,
            },
        );
        store::save_json_atomic(&self.path, &doc)
    }

    /// Stop monitoring `url`. Returns whether it was monitored.
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        if doc.remove(url.trim()).is_none() {
            return Ok(false);
        }
        store::save_json_atomic(&self.path, &doc)?;
        Ok(true)
    }

    pub async fn list(&self) -> Vec<MonitoredPlaylist> {
        let _guard = self.lock.lock().await;
        self.load().into_values().collect()
    }

    /// List every monitored playlist and enqueue its unseen entries as video
    /// jobs with the queue's default quality and format.
    ///
    /// A failing playlist is logged and skipped; the rest are still checked.
    /// The document is saved once at the end.
    pub async fn check_all(&self) -> CheckReport {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        let mut report = CheckReport::default();

        let engine = self.queue.engine();
        let quality = self.queue.config().default_quality.clone();
        let format = self.queue.config().default_video_format.clone();

        for playlist in doc.values_mut() {
            let entries = match engine.list_flat(&playlist.url).await {
                Ok(entries) => entries,
                Err(e) => {
                    report.failed += 1;
                    log_warning_with_context(
                        ErrorCategory::Network,
                        "Playlist check failed",
                        json!({ "playlist": playlist.url, "error": e.to_string() }),
                    );
                    continue;
                }
            };

            report.checked += 1;
            let mut seen: HashSet<String> = playlist.downloaded_videos.iter().cloned().collect();

            for entry in entries {
                if seen.contains(&entry.id) {
                    continue;
                }

                let title = entry.title.clone().unwrap_or_else(|| FALLBACK_ENTRY_TITLE.to_string());
                let request =
                    JobRequest::new(entry.resolve_url(), MediaKind::Video).quality(&quality).format(&format).title(title);

                match self.queue.submit(request) {
                    Ok(_) => {
                        report.enqueued += 1;
                        seen.insert(entry.id.clone());
                        playlist.downloaded_videos.push(entry.id);
                    }
                    Err(e) => log_warning_with_context(
                        ErrorCategory::Validation,
                        "Could not enqueue playlist entry",
                        json!({ "playlist": playlist.url, "entry": entry.id, "error": e.to_string() }),
                    ),
                }
            }

            playlist.last_check = Some(now());
        }

        if let Err(e) = store::save_json_atomic(&self.path, &doc) {
            log_warning_with_context(
                ErrorCategory::Persistence,
                "Failed to save monitored playlists",
                json!({ "path": self.path.display().to_string(), "error": e.to_string() }),
            );
        }

        log_info_with_context(
            ErrorCategory::Download,
            "Playlist check finished",
            json!({ "checked": report.checked, "failed": report.failed, "enqueued": report.enqueued }),
        );
        report
    }
}
