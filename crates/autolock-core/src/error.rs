//! Unified error type for the autolock core library.
//!
//! Each module has its own focused error type (`DecodeRejection`,
//! `MonitorError`, `SettingsError`, ...); [`AutolockError`] unifies them for
//! callers that cross module boundaries. Advertisement decode rejections are
//! deliberately *not* represented here: they are resolved locally by dropping
//! the advertisement and never propagate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionError;
use crate::settings::SettingsError;
use crate::watcher::MonitorError;

/// The unified error type for autolock operations.
#[derive(Debug, Error)]
pub enum AutolockError {
    // Bluetooth
    /// No Bluetooth adapter was found on this system.
    #[error("no Bluetooth adapter found; ensure hardware is present and bluetoothd is running")]
    AdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off; run 'bluetoothctl power on'")]
    AdapterPoweredOff,

    /// Scanning failed after it was started.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    // Proximity monitoring
    /// The platform refused location/monitoring permission.
    ///
    /// Expected operational state, not a system failure: the watcher stays
    /// idle and the user retries explicitly.
    #[error("location permission denied by the platform")]
    PermissionDenied,

    /// The region subsystem failed.
    #[error("region subsystem failure: {0}")]
    Monitor(String),

    // Settings & session
    /// A vehicle id was not usable as a settings key.
    #[error("invalid vehicle id: '{0}'")]
    InvalidVehicleId(String),

    /// Persisting or reading stored data failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    // Configuration
    /// The configuration could not be parsed or produced.
    #[error("configuration error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`](std::result::Result) for autolock operations.
pub type Result<T> = std::result::Result<T, AutolockError>;

impl AutolockError {
    /// Whether this error concerns the Bluetooth radio.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound | Self::AdapterPoweredOff | Self::ScanFailed(_)
        )
    }

    /// Whether this error concerns configuration or stored data.
    #[inline]
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVehicleId(_) | Self::Persistence(_) | Self::Config(_) | Self::Io(_)
        )
    }

    /// Whether this error is an expected operational state rather than a
    /// system failure.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    /// Whether retrying the operation later can succeed without
    /// reconfiguration.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed(_) | Self::Monitor(_) | Self::PermissionDenied
        )
    }
}

impl From<MonitorError> for AutolockError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::PermissionDenied => Self::PermissionDenied,
            MonitorError::Subsystem(message) => Self::Monitor(message),
        }
    }
}

impl From<SettingsError> for AutolockError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::InvalidVehicleId(id) => Self::InvalidVehicleId(id),
            SettingsError::Read { .. } | SettingsError::Write { .. } => {
                Self::Persistence(err.to_string())
            }
            SettingsError::Json(e) => Self::Persistence(e.to_string()),
        }
    }
}

impl From<SessionError> for AutolockError {
    fn from(err: SessionError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<ConfigError> for AutolockError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { .. } | ConfigError::Write { .. } => {
                Self::Persistence(err.to_string())
            }
            ConfigError::Parse { .. } | ConfigError::Serialize(_) | ConfigError::NoProjectDir(_) => {
                Self::Config(err.to_string())
            }
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<crate::bluetooth::ScanError> for AutolockError {
    fn from(err: crate::bluetooth::ScanError) -> Self {
        use crate::bluetooth::ScanError;
        match err {
            ScanError::AdapterNotFound => Self::AdapterNotFound,
            ScanError::AdapterPoweredOff => Self::AdapterPoweredOff,
            ScanError::Session(e) | ScanError::Discovery(e) => Self::ScanFailed(e.to_string()),
        }
    }
}
