//! JSON document persistence shared by config, history and the playlist monitor.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{QueueError, Result};
use crate::logging::{ErrorCategory, log_warning_with_context};

/// Read a JSON document, falling back to the default when it is missing or corrupt.
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            log_warning_with_context(
                ErrorCategory::Persistence,
                "Failed to read document, using defaults",
                serde_json::json!({ "path": path.display().to_string(), "error": e.to_string() }),
            );
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            log_warning_with_context(
                ErrorCategory::Persistence,
                "Corrupt document, using defaults",
                serde_json::json!({ "path": path.display().to_string(), "error": e.to_string() }),
            );
            T::default()
        }
    }
}

/// Write a JSON document through a temp file and rename, so readers never see half a document.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| QueueError::io(format!("creating directory {}", parent.display()), e))?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| QueueError::internal(format!("failed to serialize {}: {e}", path.display())))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| QueueError::io(format!("writing {}", tmp.display()), e))?;
    std::fs::rename(&tmp, path).map_err(|e| QueueError::io(format!("replacing {}", path.display()), e))?;
    Ok(())
}
