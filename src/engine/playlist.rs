//! Flattened playlist parsing for yt-dlp output.

use std::collections::HashSet;

use serde_json::Value;

use super::{EngineError, FlatEntry};

/// Safety cap for playlist expansion to avoid unbounded queue growth
pub const MAX_PLAYLIST_ITEMS: usize = 500;

/// Playlist title plus its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPlaylist {
    pub title: Option<String>,
    pub entries: Vec<FlatEntry>,
}

/// Normalize a yt-dlp flat-playlist entry. Entries without an id are dropped.
fn normalize_entry(entry: &Value) -> Option<FlatEntry> {
    let id = entry.get("id").and_then(Value::as_str).filter(|s| !s.is_empty())?.to_string();

    // Prefer webpage_url as it keeps the watch page
    let direct_url = ["webpage_url", "url"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str).filter(|u| u.starts_with("http")))
        .map(str::to_string);

    let title = entry.get("title").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string);

    Some(FlatEntry { id, title, direct_url })
}

/// Parse yt-dlp `-J --flat-playlist` JSON.
///
/// A document with no `entries` array is a single item, not a playlist, and
/// yields an empty listing.
pub fn parse_flat_playlist(json_str: &str) -> Result<FlatPlaylist, EngineError> {
    let v: Value =
        serde_json::from_str(json_str).map_err(|e| EngineError::Parse(format!("Failed to parse yt-dlp JSON: {e}")))?;

    let title = v
        .get("title")
        .or_else(|| v.get("playlist_title"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let Some(raw_entries) = v.get("entries").and_then(Value::as_array) else {
        return Ok(FlatPlaylist { title, entries: Vec::new() });
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for entry in raw_entries {
        let Some(item) = normalize_entry(entry) else {
            continue;
        };

        if !seen.insert(item.id.clone()) {
            continue;
        }

        entries.push(item);
        if entries.len() >= MAX_PLAYLIST_ITEMS {
            break;
        }
    }

    Ok(FlatPlaylist { title, entries })
}
