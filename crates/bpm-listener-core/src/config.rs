//! Session configuration
//!
//! Stored as JSON. Every field is optional; a missing or unreadable file
//! yields the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::chain::ChainMode;
use crate::detection::engine::EngineOptions;
use crate::detection::router::DEFAULT_CONFIDENCE_THRESHOLD;

fn default_detection_timeout_ms() -> u64 {
    15_000
}

fn default_confidence_threshold() -> u32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

/// Configuration of one session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to listen before giving up
    #[serde(default = "default_detection_timeout_ms")]
    pub detection_timeout_ms: u64,
    /// Support count for early acceptance of a running candidate
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u32,
    /// Preprocessing between capture and the engine input
    #[serde(default)]
    pub preprocessing: ChainMode,
    /// Options handed to the tempo engine
    #[serde(default)]
    pub engine: EngineOptions,
    /// Input device name (None = default input device)
    #[serde(default)]
    pub device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detection_timeout_ms: default_detection_timeout_ms(),
            confidence_threshold: default_confidence_threshold(),
            preprocessing: ChainMode::default(),
            engine: EngineOptions::default(),
            device: None,
        }
    }
}

impl SessionConfig {
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to `path`, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.detection_timeout(), Duration::from_secs(15));
        assert_eq!(config.confidence_threshold, 5);
        assert_eq!(config.preprocessing, ChainMode::Full);
        assert_eq!(config.device, None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"preprocessing": "direct", "engine": {"continuous_analysis": false}}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.preprocessing, ChainMode::Direct);
        assert!(!config.engine.continuous_analysis);
        assert_eq!(config.engine.stabilization_time_ms, 5000);
        assert_eq!(config.detection_timeout_ms, 15_000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = SessionConfig {
            detection_timeout_ms: 8000,
            confidence_threshold: 7,
            device: Some("USB Mic".to_string()),
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path), config);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(SessionConfig::load(&path), SessionConfig::default());
        assert_eq!(
            SessionConfig::load(&dir.path().join("missing.json")),
            SessionConfig::default()
        );
    }
}
