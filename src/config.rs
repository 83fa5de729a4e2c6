//! Persisted application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::observer::OverwritePolicy;
use crate::store;

pub const DEFAULT_MAX_CONCURRENT: usize = 1;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_PAUSE_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_ENGINE_BINARY: &str = "yt-dlp";

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_quality() -> String {
    crate::job::DEFAULT_QUALITY.to_string()
}

fn default_video_format() -> String {
    "mp4".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_pause_poll_interval_ms() -> u64 {
    DEFAULT_PAUSE_POLL_INTERVAL_MS
}

fn default_engine_binary() -> String {
    DEFAULT_ENGINE_BINARY.to_string()
}

/// Settings stored in `config.json`. Unknown keys are ignored and missing
/// keys take their defaults, so older documents keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub download_path: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_quality")]
    pub default_quality: String,
    #[serde(default = "default_video_format")]
    pub default_video_format: String,
    #[serde(default = "default_audio_format")]
    pub default_audio_format: String,
    #[serde(default)]
    pub overwrite_policy: OverwritePolicy,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,
}

impl AppConfig {
    /// Defaults with downloads going under `download_path`.
    pub fn default_for(download_path: impl Into<PathBuf>) -> Self {
        Self {
            download_path: download_path.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_quality: default_quality(),
            default_video_format: default_video_format(),
            default_audio_format: default_audio_format(),
            overwrite_policy: OverwritePolicy::default(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            pause_poll_interval_ms: DEFAULT_PAUSE_POLL_INTERVAL_MS,
            engine_binary: default_engine_binary(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.download_path.as_os_str().is_empty() {
            return Err(QueueError::invalid_path("Download path cannot be empty"));
        }
        if self.max_concurrent == 0 {
            return Err(QueueError::invalid_job("max_concurrent must be at least 1"));
        }
        if self.engine_binary.trim().is_empty() {
            return Err(QueueError::invalid_path("Engine binary cannot be empty"));
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent.max(1),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            pause_poll_interval: Duration::from_millis(self.pause_poll_interval_ms.max(1)),
            overwrite_policy: self.overwrite_policy,
            default_quality: self.default_quality.clone(),
            default_video_format: self.default_video_format.clone(),
        }
    }
}

/// Runtime knobs for the queue manager.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub tick_interval: Duration,
    pub pause_poll_interval: Duration,
    pub overwrite_policy: OverwritePolicy,
    /// Used for jobs the queue creates itself (monitor, batch import).
    pub default_quality: String,
    pub default_video_format: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            pause_poll_interval: Duration::from_millis(DEFAULT_PAUSE_POLL_INTERVAL_MS),
            overwrite_policy: OverwritePolicy::default(),
            default_quality: default_quality(),
            default_video_format: default_video_format(),
        }
    }
}

/// Load `config.json`, using defaults rooted at `fallback_download_path`
/// when the document is missing or unreadable.
pub fn load_config(path: &Path, fallback_download_path: &Path) -> AppConfig {
    let fallback = AppConfig::default_for(fallback_download_path);
    let raw: Option<AppConfig> = store::load_json_or_default(path);
    match raw {
        Some(config) if config.validate().is_ok() => config,
        Some(_) => {
            crate::logging::log_warning_simple(
                crate::logging::ErrorCategory::Validation,
                "Invalid config document, using defaults",
            );
            fallback
        }
        None => fallback,
    }
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    config.validate()?;
    store::save_json_atomic(path, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.json"), Path::new("/downloads"));
        assert_eq!(config, AppConfig::default_for("/downloads"));
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.overwrite_policy, OverwritePolicy::Ask);
    }

    #[test]
    fn test_legacy_document_with_only_download_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"download_path": "/srv/media"}"#).unwrap();

        let config = load_config(&path, Path::new("/fallback"));
        assert_eq!(config.download_path, PathBuf::from("/srv/media"));
        assert_eq!(config.default_quality, "best");
        assert_eq!(config.engine_binary, "yt-dlp");
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"download_path": "/srv/media", "max_concurrent": 0}"#).unwrap();

        let config = load_config(&path, Path::new("/fallback"));
        assert_eq!(config.download_path, PathBuf::from("/fallback"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default_for(dir.path().join("media"));
        config.max_concurrent = 3;
        config.overwrite_policy = OverwritePolicy::Always;

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path, Path::new("/other")), config);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default_for("/media");
        config.max_concurrent = 0;
        assert!(save_config(&dir.path().join("config.json"), &config).is_err());
    }

    #[test]
    fn test_queue_config_from_app_config() {
        let mut config = AppConfig::default_for("/media");
        config.tick_interval_ms = 250;
        let qc = config.queue_config();
        assert_eq!(qc.tick_interval, Duration::from_millis(250));
        assert_eq!(qc.max_concurrent, 1);
    }
}
