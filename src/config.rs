//! Configuration management for voice-reader.
//!
//! Loads config from YAML files in standard locations. Every section and
//! field has a default, so a partial file (or none at all) is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// BCP-47 language tag used for voice resolution.
    pub lang: String,
    pub rate: f32,
    /// Forwarded to the primitive; Kokoro has no pitch control.
    pub pitch: f32,
    /// Preferred voice identifier. Empty means "first voice for `lang`".
    pub voice: String,
    pub max_chunk_len: usize,
    /// Give up on a session after this many failed chunks in a row (0 = never).
    pub max_consecutive_errors: u32,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lang: "en-US".into(),
            rate: 1.0,
            pitch: 1.0,
            voice: "af_heart".into(),
            max_chunk_len: crate::narrator::segment::DEFAULT_MAX_CHUNK_LEN,
            max_consecutive_errors: 5,
            model_path: "kokoro-v1.0.onnx".into(),
            voices_path: "voices-v1.0.bin".into(),
            tokenizer_path: "tokenizer.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Unsplash access key. Falls back to `UNSPLASH_ACCESS_KEY` when empty.
    pub access_key: String,
    pub api_base: String,
    pub count: usize,
    pub interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            api_base: "https://api.unsplash.com".into(),
            count: 12,
            interval_ms: 2000,
            debounce_ms: 500,
        }
    }
}

impl ImagesConfig {
    pub fn resolved_access_key(&self) -> String {
        let key = self.access_key.trim();
        if !key.is_empty() {
            return key.to_string();
        }
        std::env::var("UNSPLASH_ACCESS_KEY")
            .map(|k| k.trim().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where text and topic are persisted. Empty means the default location.
    pub path: String,
}

impl SessionConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if !self.path.is_empty() {
            return PathBuf::from(&self.path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voice-reader/session.json")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub images: ImagesConfig,
    pub session: SessionConfig,
    pub api: ApiConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/voice-reader/config.yaml
    /// 3. /etc/voice-reader/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/voice-reader/config.yaml")),
                Some(PathBuf::from("/etc/voice-reader/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.speech.max_chunk_len, 180);
        assert_eq!(config.speech.lang, "en-US");
        assert_eq!(config.images.interval_ms, 2000);
        assert_eq!(config.images.count, 12);
        assert_eq!(config.api.port, 8768);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "speech:\n  voice: ef_dora\n  lang: es\nimages:\n  interval_ms: 750\n";
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.speech.voice, "ef_dora");
        assert_eq!(config.speech.lang, "es");
        assert_eq!(config.speech.max_chunk_len, 180);
        assert_eq!(config.images.interval_ms, 750);
        assert_eq!(config.images.debounce_ms, 500);
        assert!(config.api.enabled);
    }

    #[test]
    fn unreadable_path_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "speech: [this is not a map").unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.speech.voice, "af_heart");
    }

    #[test]
    fn explicit_access_key_wins() {
        let images = ImagesConfig {
            access_key: "  abc123  ".into(),
            ..ImagesConfig::default()
        };
        assert_eq!(images.resolved_access_key(), "abc123");
    }

    #[test]
    fn explicit_session_path_is_used() {
        let session = SessionConfig {
            path: "/tmp/vr-session.json".into(),
        };
        assert_eq!(session.resolved_path(), PathBuf::from("/tmp/vr-session.json"));
    }
}
