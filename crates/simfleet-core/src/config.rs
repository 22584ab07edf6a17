//! Persistent configuration for simfleet.
//!
//! Stores user settings in `~/.simfleet/config.json`. Every field is
//! optional on disk; command-line flags take precedence over stored values.
//!
//! # Example
//!
//! ```no_run
//! use simfleet_core::config::FleetConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = FleetConfig::load();
//!
//! if let Some(root) = &config.android_sdk_root {
//!     println!("Android SDK: {}", root.display());
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::DEFAULT_READY_TIMEOUT;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the simfleet data directory (`~/.simfleet/`).
///
/// Falls back to the system temp directory when no home directory is known.
pub fn simfleet_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".simfleet")
}

/// Path of the configuration file.
pub fn config_path() -> PathBuf {
    simfleet_dir().join(CONFIG_FILENAME)
}

/// Keys accepted by [`FleetConfig::set`] and [`FleetConfig::unset`].
pub const CONFIG_KEYS: &[&str] = &["android-sdk-root", "boot-timeout-secs", "screenshot-dir", "locales"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown config key '{0}' (expected one of: android-sdk-root, boot-timeout-secs, screenshot-dir, locales)")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

fn default_boot_timeout_secs() -> u64 {
    DEFAULT_READY_TIMEOUT.as_secs()
}

/// Persistent simfleet configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Android SDK root containing `platform-tools/` and `emulator/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_sdk_root: Option<PathBuf>,

    /// Readiness timeout in seconds.
    #[serde(default = "default_boot_timeout_secs")]
    pub boot_timeout_secs: u64,

    /// Default directory for saved screenshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,

    /// Default locale variants for batch runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locales: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            android_sdk_root: None,
            boot_timeout_secs: default_boot_timeout_secs(),
            screenshot_dir: None,
            locales: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Load config from `~/.simfleet/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        std::fs::read_to_string(config_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.simfleet/config.json`, creating the directory.
    pub fn save(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(simfleet_dir())?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(config_path(), json)
    }

    /// Set one field from its string form. `locales` takes a comma-separated
    /// list.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "android-sdk-root" => self.android_sdk_root = Some(PathBuf::from(value)),
            "screenshot-dir" => self.screenshot_dir = Some(PathBuf::from(value)),
            "boot-timeout-secs" => {
                self.boot_timeout_secs = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?
            }
            "locales" => {
                self.locales = value
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Reset one field to its default.
    pub fn unset(&mut self, key: &str) -> Result<(), ConfigError> {
        let defaults = Self::default();
        match key {
            "android-sdk-root" => self.android_sdk_root = defaults.android_sdk_root,
            "screenshot-dir" => self.screenshot_dir = defaults.screenshot_dir,
            "boot-timeout-secs" => self.boot_timeout_secs = defaults.boot_timeout_secs,
            "locales" => self.locales = defaults.locales,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = FleetConfig::default();
        assert!(config.android_sdk_root.is_none());
        assert_eq!(config.boot_timeout(), Duration::from_secs(180));
        assert!(config.screenshot_dir.is_none());
        assert!(config.locales.is_empty());
    }

    #[test]
    fn roundtrip_serialization() {
        let config = FleetConfig {
            android_sdk_root: Some(PathBuf::from("/opt/android-sdk")),
            boot_timeout_secs: 60,
            screenshot_dir: Some(PathBuf::from("/tmp/shots")),
            locales: vec!["en_US".to_string(), "fr_FR".to_string()],
        };
        let json = serde_json::to_string(&config).unwrap();
        let loaded: FleetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: FleetConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, FleetConfig::default());
    }

    #[test]
    fn config_path_is_under_simfleet_dir() {
        assert!(config_path().starts_with(simfleet_dir()));
        assert!(config_path().ends_with("config.json"));
    }

    #[test]
    fn set_parses_each_key() {
        let mut config = FleetConfig::default();
        config.set("android-sdk-root", "/opt/android-sdk").unwrap();
        config.set("boot-timeout-secs", "90").unwrap();
        config.set("locales", "en_US, fr_FR,,de_DE").unwrap();

        assert_eq!(config.android_sdk_root, Some(PathBuf::from("/opt/android-sdk")));
        assert_eq!(config.boot_timeout(), Duration::from_secs(90));
        assert_eq!(config.locales, vec!["en_US", "fr_FR", "de_DE"]);
    }

    #[test]
    fn set_rejects_bad_input() {
        let mut config = FleetConfig::default();
        assert!(matches!(
            config.set("boot-timeout-secs", "soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(config.set("colour", "blue"), Err(ConfigError::UnknownKey(_))));
        assert_eq!(config, FleetConfig::default());
    }

    #[test]
    fn unset_restores_default() {
        let mut config = FleetConfig::default();
        config.set("boot-timeout-secs", "5").unwrap();
        config.set("screenshot-dir", "/tmp/shots").unwrap();
        for key in CONFIG_KEYS {
            config.unset(key).unwrap();
        }
        assert_eq!(config, FleetConfig::default());
    }
}
