//! Local media-download queue manager.
//!
//! Accepts URLs, classifies their platform, queues download jobs and runs
//! them with bounded concurrency against an [`engine::ExtractionEngine`].
//! Front ends drive it through [`QueueManager`] and listen through a
//! [`QueueObserver`].

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod observer;
pub mod paths;
pub mod platform;
pub mod queue;
pub mod store;
mod worker;

pub use config::{AppConfig, QueueConfig};
pub use engine::{ExtractionEngine, YtDlpEngine};
pub use error::{EngineError, QueueError, Result};
pub use history::{HistoryRecord, HistoryStore};
pub use job::{Job, JobId, JobRequest, JobSnapshot, JobStatus, MediaKind};
pub use monitor::PlaylistMonitor;
pub use observer::{JobOutcome, OverwritePolicy, PolicyObserver, QueueObserver};
pub use paths::{AppPaths, PathResolver};
pub use platform::Platform;
pub use queue::{QueueManager, QueueSnapshot};
