//! Filesystem layout for downloads and application data.

use std::path::{Path, PathBuf};

use crate::error::{QueueError, Result};
use crate::job::MediaKind;
use crate::platform::Platform;

const BATCH_DIR: &str = "Batch";
const METADATA_DIR: &str = "Metadata";

const CONFIG_FILE_NAME: &str = "config.json";
const HISTORY_FILE_NAME: &str = "download_history.json";
const MONITORED_PLAYLISTS_FILE_NAME: &str = "monitored_playlists.json";
const LOGS_DIR: &str = "logs";

/// Maps a (platform, media kind) pair to an output directory under one root.
///
/// Immutable: changing the download root swaps in a new resolver, so a
/// running job keeps resolving against the root it started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{Platform}/{Videos|Audio}`
    pub fn output_dir(&self, platform: Platform, kind: MediaKind) -> PathBuf {
        self.root.join(platform.dir_name()).join(kind.dir_name())
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.root.join(BATCH_DIR)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// Create every directory of the layout. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        let mut dirs = vec![self.batch_dir(), self.metadata_dir()];
        for platform in Platform::ALL {
            for kind in [MediaKind::Video, MediaKind::Audio] {
                dirs.push(self.output_dir(platform, kind));
            }
        }

        for dir in dirs {
            std::fs::create_dir_all(&dir)
                .map_err(|e| QueueError::io(format!("creating directory {}", dir.display()), e))?;
        }
        Ok(())
    }
}

/// Where application-owned documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE_NAME)
    }

    pub fn monitored_playlists_path(&self) -> PathBuf {
        self.data_dir.join(MONITORED_PLAYLISTS_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }
}
