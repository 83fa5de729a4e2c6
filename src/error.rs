//! Error types for the queue core and its engine adapter.
//!
//! Every failure maps to an [`ErrorCode`] whose string form never changes,
//! so a front end can branch on `E_VAL_*` (fix the input), `E_IO_*`
//! (filesystem), `E_DL_*` (engine, sometimes worth retrying), `E_Q_*`
//! (queue command refused) or `E_INTERNAL`.

use serde::Serialize;
use thiserror::Error;

macro_rules! error_codes {
    ($($variant:ident => $code:literal),+ $(,)?) => {
        /// Stable machine-readable error identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum ErrorCode {
            $(#[serde(rename = $code)] $variant,)+
        }

        impl ErrorCode {
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $code,)+
                }
            }
        }
    };
}

error_codes! {
    EValInvalidUrl => "E_VAL_INVALID_URL",
    EValInvalidJob => "E_VAL_INVALID_JOB",
    EValInvalidPath => "E_VAL_INVALID_PATH",
    EIoFailed => "E_IO_FAILED",
    EIoNotFound => "E_IO_NOT_FOUND",
    EIoPermissionDenied => "E_IO_PERMISSION_DENIED",
    EDlSpawnFailed => "E_DL_SPAWN_FAILED",
    EDlProcessFailed => "E_DL_PROCESS_FAILED",
    EDlCancelled => "E_DL_CANCELLED",
    EDlParseFailed => "E_DL_PARSE_FAILED",
    EDlOutputUnavailable => "E_DL_OUTPUT_UNAVAILABLE",
    EQueueNotFound => "E_Q_NOT_FOUND",
    EQueueInvalidTransition => "E_Q_INVALID_TRANSITION",
    EQueueAlreadyRunning => "E_Q_ALREADY_RUNNING",
    EInternal => "E_INTERNAL",
}

impl ErrorCode {
    /// Engine process failures may succeed on a second attempt; nothing else will.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::EDlProcessFailed | Self::EDlSpawnFailed)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationKind {
    InvalidUrl,
    InvalidJob,
    InvalidPath,
}

/// Why the queue refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueErrorKind {
    NotFound,
    InvalidTransition,
    AlreadyRunning,
}

/// Failures reported by an extraction engine for a single operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cooperative abort observed at a progress checkpoint. Not a failure.
    #[error("cancelled")]
    Cancelled,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine exited with status {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("could not parse engine output: {0}")]
    Parse(String),

    #[error("io error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine produced no output file: {0}")]
    OutputUnavailable(String),
}

fn io_code(source: &std::io::Error) -> ErrorCode {
    match source.kind() {
        std::io::ErrorKind::NotFound => ErrorCode::EIoNotFound,
        std::io::ErrorKind::PermissionDenied => ErrorCode::EIoPermissionDenied,
        _ => ErrorCode::EIoFailed,
    }
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Cancelled => ErrorCode::EDlCancelled,
            Self::Spawn { .. } => ErrorCode::EDlSpawnFailed,
            Self::Process { .. } => ErrorCode::EDlProcessFailed,
            Self::Parse(_) => ErrorCode::EDlParseFailed,
            Self::Io { source, .. } => io_code(source),
            Self::OutputUnavailable(_) => ErrorCode::EDlOutputUnavailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation error ({kind:?}): {message}")]
    Validation { kind: ValidationKind, message: String },

    #[error("io error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("queue error ({kind:?}): {message}")]
    Queue { kind: QueueErrorKind, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// What a presentation layer gets to show: code, message, retry hint.
#[derive(Debug, Clone, Serialize)]
pub struct FrontendError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl QueueError {
    fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    fn queue(kind: QueueErrorKind, message: impl Into<String>) -> Self {
        Self::Queue {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::validation(ValidationKind::InvalidUrl, message)
    }

    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::validation(ValidationKind::InvalidJob, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::validation(ValidationKind::InvalidPath, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::queue(QueueErrorKind::NotFound, message)
    }

    /// The job's current status does not allow the requested command.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::queue(QueueErrorKind::InvalidTransition, message)
    }

    pub fn already_running(message: impl Into<String>) -> Self {
        Self::queue(QueueErrorKind::AlreadyRunning, message)
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { kind: ValidationKind::InvalidUrl, .. } => ErrorCode::EValInvalidUrl,
            Self::Validation { kind: ValidationKind::InvalidJob, .. } => ErrorCode::EValInvalidJob,
            Self::Validation { kind: ValidationKind::InvalidPath, .. } => ErrorCode::EValInvalidPath,
            Self::Io { source, .. } => io_code(source),
            Self::Queue { kind: QueueErrorKind::NotFound, .. } => ErrorCode::EQueueNotFound,
            Self::Queue { kind: QueueErrorKind::InvalidTransition, .. } => ErrorCode::EQueueInvalidTransition,
            Self::Queue { kind: QueueErrorKind::AlreadyRunning, .. } => ErrorCode::EQueueAlreadyRunning,
            Self::Engine(e) => e.code(),
            Self::Internal { .. } => ErrorCode::EInternal,
        }
    }

    pub fn to_frontend_error(&self) -> FrontendError {
        let code = self.code();
        FrontendError {
            code: code.as_str(),
            message: self.to_string(),
            retryable: code.is_retryable(),
        }
    }

    /// [`Self::to_frontend_error`] as a JSON string; falls back to the plain message.
    pub fn to_frontend_json(&self) -> String {
        serde_json::to_string(&self.to_frontend_error()).unwrap_or_else(|_| self.to_string())
    }
}
