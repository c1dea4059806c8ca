/// Application configuration
///
/// Settings are stored as JSON next to the catalog:
/// - Linux: ~/.local/share/storyboard-studio/config.json
/// - macOS: ~/Library/Application Support/storyboard-studio/config.json
/// - Windows: %APPDATA%\storyboard-studio\config.json
///
/// A missing file means defaults. Every field is optional in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name under the platform data directory
pub const APP_DIR: &str = "storyboard-studio";

/// Environment variable consulted by `ApiKeyConfig::init`
pub const API_KEY_ENV: &str = "STORYBOARD_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine user data directory")]
    NoDataDir,
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Preview rendering parameters
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PreviewConfig {
    /// Longest edge of a preview in pixels
    pub max_dimension: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            jpeg_quality: 70,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Where the catalog lives; `None` means the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Quiet period before dirty projects are written
    pub autosave_debounce_ms: u64,
    /// Mandatory pause after every AI call
    pub throttle_secs: u32,
    /// Pause after the AI service reports a rate limit
    pub cooldown_secs: u32,
    pub preview: PreviewConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            autosave_debounce_ms: 1000,
            throttle_secs: 5,
            cooldown_secs: 60,
            preview: PreviewConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the default location when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_dir()?.join("config.json"),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The platform data directory for this application
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDataDir)?;
        path.push(APP_DIR);
        Ok(path)
    }

    /// Directory holding the catalog database
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_dir(),
        }
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}

/// Health of the configured API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStatus {
    /// No key configured
    #[default]
    Missing,
    Active,
    /// Rate limited recently
    Warning,
    /// Rejected by the service
    Error,
}

/// The credential used for AI calls
///
/// Process-wide, but passed explicitly to whoever gates AI calls.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeyConfig {
    key: Option<String>,
    status: KeyStatus,
}

impl ApiKeyConfig {
    /// Load the key from the environment, falling back to a stored value
    pub fn init(stored: Option<String>) -> Self {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .or(stored)
            .filter(|k| !k.trim().is_empty());
        Self::from_key(key)
    }

    pub fn from_key(key: Option<String>) -> Self {
        let status = if key.is_some() {
            KeyStatus::Active
        } else {
            KeyStatus::Missing
        };
        Self { key, status }
    }

    /// Replace the key; the new key starts out healthy
    pub fn reset(&mut self, key: impl Into<String>) {
        *self = Self::from_key(Some(key.into()).filter(|k| !k.trim().is_empty()));
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: KeyStatus) {
        self.status = status;
    }
}

impl std::fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("status", &self.status)
            .finish()
    }
}
