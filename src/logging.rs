//! JSON-lines logging.
//!
//! Two files live in the directory installed with [`init`]: `mediaqueue.log`
//! holds one [`StructuredLogEntry`] per line and `mediaqueue-engine.log` keeps
//! raw engine stderr tagged with the job id. Each file is moved to `<name>.1`
//! once it reaches [`MAX_LOG_BYTES`]. Until a directory is installed all
//! output goes to stderr. `MEDIAQUEUE_LOG_LEVEL` sets the threshold.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const MAX_LOG_BYTES: u64 = 1_000_000;

const LEVEL_ENV: &str = "MEDIAQUEUE_LOG_LEVEL";

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();
static THRESHOLD: OnceLock<LogLevel> = OnceLock::new();

/// Ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" | "trace" => Self::Debug,
            other => return Err(format!("unknown log level '{other}'")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Network,
    Validation,
    System,
    Download,
    Persistence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub level: LogLevel,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl StructuredLogEntry {
    pub fn new(level: LogLevel, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            level,
            category,
            message: message.into(),
            context: None,
            error_details: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_details(mut self, details: Option<&str>) -> Self {
        self.error_details = details.map(str::to_owned);
        self
    }
}

#[derive(Clone, Copy)]
enum Sink {
    Structured,
    Engine,
}

impl Sink {
    fn file_name(self) -> &'static str {
        match self {
            Sink::Structured => "mediaqueue.log",
            Sink::Engine => "mediaqueue-engine.log",
        }
    }

    fn path(self) -> Option<PathBuf> {
        LOG_DIR.get().map(|dir| dir.join(self.file_name()))
    }
}

/// Install the log directory. Returns false if one was already installed.
pub fn init(dir: impl Into<PathBuf>) -> bool {
    LOG_DIR.set(dir.into()).is_ok()
}

fn threshold() -> LogLevel {
    *THRESHOLD.get_or_init(|| {
        std::env::var(LEVEL_ENV)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    })
}

fn rotated(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".1");
    path.with_file_name(name)
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::metadata(path).is_ok_and(|m| m.len() >= MAX_LOG_BYTES) {
        let aside = rotated(path);
        let _ = fs::remove_file(&aside);
        fs::rename(path, aside)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn emit(sink: Sink, line: &str) {
    let Some(path) = sink.path() else {
        eprintln!("{line}");
        return;
    };
    if let Err(e) = append_line(&path, line) {
        eprintln!("log write to {} failed: {e}", path.display());
        eprintln!("{line}");
    }
}

/// Write `entry` if its level passes the configured threshold.
pub fn log_entry(entry: StructuredLogEntry) {
    if entry.level > threshold() {
        return;
    }
    match serde_json::to_string(&entry) {
        Ok(line) => emit(Sink::Structured, &line),
        Err(e) => eprintln!("unserializable log entry ({e}): {}", entry.message),
    }
}

/// Record one engine stderr line for `job_id`. Never fails the caller.
pub fn append_engine_log(job_id: &str, line: &str) {
    let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    emit(Sink::Engine, &format!("{stamp} [job-{job_id}] {line}"));
}

pub fn log_error_with_context(
    category: ErrorCategory,
    message: &str,
    context: serde_json::Value,
    error_details: Option<&str>,
) {
    log_entry(
        StructuredLogEntry::new(LogLevel::Error, category, message)
            .with_context(context)
            .with_details(error_details),
    );
}

pub fn log_warning_simple(category: ErrorCategory, message: &str) {
    log_entry(StructuredLogEntry::new(LogLevel::Warn, category, message));
}

pub fn log_warning_with_context(category: ErrorCategory, message: &str, context: serde_json::Value) {
    log_entry(StructuredLogEntry::new(LogLevel::Warn, category, message).with_context(context));
}

pub fn log_info_simple(category: ErrorCategory, message: &str) {
    log_entry(StructuredLogEntry::new(LogLevel::Info, category, message));
}

pub fn log_info_with_context(category: ErrorCategory, message: &str, context: serde_json::Value) {
    log_entry(StructuredLogEntry::new(LogLevel::Info, category, message).with_context(context));
}

pub fn log_debug_simple(category: ErrorCategory, message: &str) {
    log_entry(StructuredLogEntry::new(LogLevel::Debug, category, message));
}
