//! Session store: the text being narrated and the image topic.
//!
//! Persisted as a small JSON document so both survive restarts. Playback
//! position is deliberately not stored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ReaderError;
use crate::narrator::segment::normalize_whitespace;

/// Words taken from the text when no topic is set.
const INFERRED_TOPIC_WORDS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionData {
    pub text: String,
    pub topic: String,
    pub updated_at: Option<String>,
}

pub struct SessionStore {
    path: PathBuf,
    data: SessionData,
}

impl SessionStore {
    /// Load from `path`. Missing or unreadable files start an empty session.
    pub fn load(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring corrupt session file {}: {e}", path.display());
                SessionData::default()
            }),
            Err(e) => {
                debug!("No session at {}: {e}", path.display());
                SessionData::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    pub fn text(&self) -> &str {
        &self.data.text
    }

    pub fn topic(&self) -> &str {
        &self.data.topic
    }

    /// The explicit topic, or one inferred from the text.
    pub fn effective_topic(&self) -> String {
        let topic = self.data.topic.trim();
        if topic.is_empty() {
            infer_topic(&self.data.text)
        } else {
            topic.to_string()
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), ReaderError> {
        self.data.text = text.into();
        self.save()
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) -> Result<(), ReaderError> {
        self.data.topic = topic.into();
        self.save()
    }

    fn save(&mut self) -> Result<(), ReaderError> {
        self.data.updated_at = Some(Local::now().to_rfc3339());
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        debug!("Session saved to {}", self.path.display());
        Ok(())
    }
}

/// First few words of the text, used as an image topic.
pub fn infer_topic(text: &str) -> String {
    normalize_whitespace(text)
        .split(' ')
        .filter(|w| !w.is_empty())
        .take(INFERRED_TOPIC_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session.json");

        let mut store = SessionStore::load(&path);
        assert_eq!(store.text(), "");
        store.set_text("Once upon a time.").unwrap();
        store.set_topic("forest").unwrap();

        let reloaded = SessionStore::load(&path);
        assert_eq!(reloaded.text(), "Once upon a time.");
        assert_eq!(reloaded.topic(), "forest");
        assert!(reloaded.data.updated_at.is_some());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        let store = SessionStore::load(&path);
        assert_eq!(store.data, SessionData::default());
    }

    #[test]
    fn topic_is_inferred_from_text() {
        assert_eq!(
            infer_topic("  The   quiet forest at dawn was still and cold. "),
            "The quiet forest at dawn"
        );
        assert_eq!(infer_topic("Ocean"), "Ocean");
        assert_eq!(infer_topic("   "), "");
    }

    #[test]
    fn explicit_topic_wins_over_inferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::load(&dir.path().join("s.json"));
        store.set_text("Solar panels on every roof").unwrap();
        assert_eq!(store.effective_topic(), "Solar panels on every roof");

        store.set_topic("  renewable energy ").unwrap();
        assert_eq!(store.effective_topic(), "renewable energy");
    }
}
