//! Bounded download history and per-download metadata sidecars.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::engine::MediaInfo;
use crate::error::{QueueError, Result};
use crate::job::{JobSnapshot, MediaKind};
use crate::logging::{ErrorCategory, log_warning_with_context};
use crate::platform::Platform;
use crate::store;

/// Newest-first entries kept in the document. Older ones are dropped.
pub const MAX_HISTORY_ENTRIES: usize = 200;

const TITLE_MAX_CHARS: usize = 60;
const DESCRIPTION_MAX_CHARS: usize = 500;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub media_kind: MediaKind,
    pub platform: Platform,
    pub filepath: PathBuf,
    pub date: String,
    /// Bytes on disk at record time, 0 when the file is gone.
    pub size: u64,
}

impl HistoryRecord {
    pub fn new(title: &str, url: &str, media_kind: MediaKind, platform: Platform, filepath: &Path) -> Self {
        Self {
            title: title.chars().take(TITLE_MAX_CHARS).collect(),
            url: url.to_string(),
            media_kind,
            platform,
            filepath: filepath.to_path_buf(),
            date: chrono::Local::now().format(DATE_FORMAT).to_string(),
            size: std::fs::metadata(filepath).map(|m| m.len()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub downloads: Vec<HistoryRecord>,
    /// Lifetime count, survives truncation.
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub by_platform: BTreeMap<Platform, u64>,
}

impl HistoryDocument {
    fn push_front(&mut self, record: HistoryRecord) {
        *self.by_platform.entry(record.platform).or_insert(0) += 1;
        self.total += 1;
        self.downloads.insert(0, record);
        self.downloads.truncate(MAX_HISTORY_ENTRIES);
    }
}

/// Owner of `download_history.json`.
///
/// Writes are serialized through a lock of their own, independent from the
/// queue lock, so a slow disk never stalls scheduling.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HistoryDocument {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        store::load_json_or_default(&self.path)
    }

    /// Prepend one record, truncate, bump counters and persist.
    pub fn record(&self, record: HistoryRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc: HistoryDocument = store::load_json_or_default(&self.path);
        doc.push_front(record);
        store::save_json_atomic(&self.path, &doc)
    }

    /// Record a completed job. Needs an output path.
    pub fn record_job(&self, job: &JobSnapshot) -> Result<()> {
        let Some(filepath) = job.progress.output_path.as_deref() else {
            return Err(QueueError::invalid_job(format!("job {} has no output path", job.id)));
        };
        self.record(HistoryRecord::new(
            &job.progress.title,
            &job.canonical_url,
            job.media_kind,
            job.platform,
            filepath,
        ))
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::io(format!("removing {}", self.path.display()), e)),
        }
    }
}

fn or_na(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("N/A")
}

fn render_sidecar(info: &MediaInfo) -> String {
    let rule = "=".repeat(70);
    let description: String = or_na(info.description.as_deref()).chars().take(DESCRIPTION_MAX_CHARS).collect();
    format!(
        "{rule}\nTitle: {}\nUploader: {}\nUpload Date: {}\nOriginal URL: {}\nDescription:\n{description}...\n{rule}\n",
        or_na(info.title.as_deref()),
        or_na(info.uploader.as_deref()),
        or_na(info.upload_date.as_deref()),
        or_na(info.webpage_url.as_deref()),
    )
}

/// Write `{metadata_dir}/{stem}_metadata.txt` next to a finished download.
///
/// Best-effort: failures are logged and swallowed.
pub fn write_sidecar_metadata(metadata_dir: &Path, output_path: &Path, info: &MediaInfo) -> Option<PathBuf> {
    let stem = output_path.file_stem()?.to_string_lossy().to_string();
    let sidecar = metadata_dir.join(format!("{stem}_metadata.txt"));

    let result = std::fs::create_dir_all(metadata_dir)
        .and_then(|_| std::fs::File::create(&sidecar))
        .and_then(|mut file| file.write_all(render_sidecar(info).as_bytes()));

    match result {
        Ok(()) => Some(sidecar),
        Err(e) => {
            log_warning_with_context(
                ErrorCategory::Persistence,
                "Failed to write metadata sidecar",
                serde_json::json!({ "path": sidecar.display().to_string(), "error": e.to_string() }),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, platform: Platform) -> HistoryRecord {
        HistoryRecord::new(title, "https://example.com/v", MediaKind::Video, platform, Path::new("/nonexistent/x.mp4"))
    }

    #[test]
    fn test_record_prepends_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("download_history.json"));

        store.record(record("first", Platform::Youtube)).unwrap();
        store.record(record("second", Platform::Tiktok)).unwrap();
        store.record(record("third", Platform::Youtube)).unwrap();

        let doc = store.load();
        assert_eq!(doc.downloads[0].title, "third");
        assert_eq!(doc.downloads[2].title, "first");
        assert_eq!(doc.total, 3);
        assert_eq!(doc.by_platform[&Platform::Youtube], 2);
        assert_eq!(doc.by_platform[&Platform::Tiktok], 1);
    }

    #[test]
    fn test_truncates_to_max_entries_but_keeps_total() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("download_history.json"));

        for i in 0..250 {
            store.record(record(&format!("item {i}"), Platform::Other)).unwrap();
        }

        let doc = store.load();
        assert_eq!(doc.downloads.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(doc.total, 250);
        assert_eq!(doc.downloads[0].title, "item 249");
        assert_eq!(doc.downloads[MAX_HISTORY_ENTRIES - 1].title, "item 50");
    }

    #[test]
    fn test_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, vec![0u8; 1234]).unwrap();

        let long_title = "x".repeat(100);
        let rec = HistoryRecord::new(&long_title, "https://youtu.be/a", MediaKind::Audio, Platform::Youtube, &file);
        assert_eq!(rec.title.chars().count(), 60);
        assert_eq!(rec.size, 1234);
        assert!(chrono::NaiveDateTime::parse_from_str(&rec.date, DATE_FORMAT).is_ok());

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["platform"], "youtube");
    }

    #[test]
    fn test_reads_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_history.json");
        std::fs::write(
            &path,
            r#"{"downloads":[{"title":"t","url":"u","type":"video","platform":"facebook","filepath":"/a.mp4","date":"2024-01-01 10:00:00","size":5}],"total":7,"by_platform":{"facebook":7}}"#,
        )
        .unwrap();

        let doc = HistoryStore::new(&path).load();
        assert_eq!(doc.total, 7);
        assert_eq!(doc.downloads[0].platform, Platform::Facebook);
    }

    #[test]
    fn test_corrupt_document_is_replaced_on_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_history.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = HistoryStore::new(&path);
        assert_eq!(store.load(), HistoryDocument::default());
        store.record(record("fresh", Platform::Other)).unwrap();
        assert_eq!(store.load().downloads.len(), 1);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("download_history.json"));
        store.clear().unwrap();
        store.record(record("a", Platform::Other)).unwrap();
        store.clear().unwrap();
        assert!(store.load().downloads.is_empty());
    }

    #[test]
    fn test_sidecar_contents() {
        let dir = tempfile::tempdir().unwrap();
        let info = MediaInfo {
            title: Some("My Clip".to_string()),
            uploader: Some("someone".to_string()),
            description: Some("d".repeat(600)),
            ..MediaInfo::default()
        };

        let sidecar =
            write_sidecar_metadata(&dir.path().join("Metadata"), Path::new("/out/My Clip.mp4"), &info).unwrap();
        assert_eq!(sidecar, dir.path().join("Metadata/My Clip_metadata.txt"));

        let text = std::fs::read_to_string(sidecar).unwrap();
        assert!(text.starts_with(&"=".repeat(70)));
        assert!(text.contains("Title: My Clip\n"));
        assert!(text.contains("Upload Date: N/A\n"));
        assert!(text.contains(&format!("Description:\n{}...\n", "d".repeat(500))));
    }
}
