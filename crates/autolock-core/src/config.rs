//! Application configuration.
//!
//! Loaded from TOML: `/etc/autolock/config.toml` on Linux, the platform
//! config directory elsewhere. Missing file means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file exists but is not valid TOML.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No usable config/data directory on this platform.
    #[error("cannot determine {0} directory")]
    NoProjectDir(&'static str),
}

/// Timeouts for deriving region and ranging state from the scan stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds without a sighting before the beacon counts as having left
    /// its region.
    pub region_timeout_secs: u64,

    /// Seconds without a sighting before the beacon counts as out of range.
    /// Shorter than the region timeout: ranging reacts faster than the
    /// geofence-style region state.
    pub range_timeout_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            region_timeout_secs: 30,
            range_timeout_secs: 5,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// BlueZ adapter name to use (e.g. `hci0`); default adapter if unset.
    pub adapter: Option<String>,

    /// Data directory override; platform default if unset.
    pub data_dir: Option<PathBuf>,

    /// Scan-derived presence timeouts.
    #[serde(default)]
    pub presence: PresenceConfig,
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from a specific path, defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content).map_err(|source| ConfigError::Write { path, source })
    }

    /// Resolve the data directory: configured override, else the platform
    /// default (`/var/lib/autolock` on Linux).
    ///
    /// # Errors
    ///
    /// Returns an error if no platform data directory can be determined.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/var/lib/autolock"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "autolock")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(ConfigError::NoProjectDir("data"))
        }
    }

    /// The platform config file path.
    fn config_path() -> Result<PathBuf, ConfigError> {
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/autolock/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "autolock")
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .ok_or(ConfigError::NoProjectDir("config"))
        }
    }
}
