//! Selected-vehicle session state.
//!
//! The currently selected vehicle is a reactive value: the coordinator
//! re-derives its watch target whenever it changes. The selection is
//! persisted as a single JSON file so the daemon picks it up again after a
//! restart. Login and the vehicle-list backend live outside this crate; they
//! hand a [`VehicleInfo`] to [`SessionStore::select`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

/// File name of the persisted selection inside the data directory.
const VEHICLE_FILE: &str = "vehicle.json";

/// A vehicle as reported by the vehicle-list backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    /// Backend identifier, the key for per-vehicle settings.
    pub id: String,

    /// License plate number.
    pub plate_no: Option<String>,

    /// Vehicle brand.
    pub brand: Option<String>,

    /// Vehicle model.
    pub model: Option<String>,
}

/// Session persistence failure.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The selection file could not be written or removed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The selection could not be serialized.
    #[error("failed to serialize vehicle info: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Holder of the currently selected vehicle.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    vehicle: watch::Sender<Option<VehicleInfo>>,
}

impl SessionStore {
    /// Open the session store, restoring a persisted selection if present.
    ///
    /// An unreadable selection file is treated as no selection.
    #[must_use]
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let path = data_dir.into().join(VEHICLE_FILE);
        let restored = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(vehicle) => Some(vehicle),
                Err(err) => {
                    warn!(path = %path.display(), %err, "ignoring unreadable vehicle selection");
                    None
                }
            },
            Err(_) => None,
        };

        let (vehicle, _) = watch::channel(restored);
        Self { path, vehicle }
    }

    /// The currently selected vehicle.
    #[must_use]
    pub fn current(&self) -> Option<VehicleInfo> {
        self.vehicle.borrow().clone()
    }

    /// Select a vehicle (or clear the selection) and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the selection file cannot be updated; the
    /// in-memory selection is still applied.
    pub fn select(&self, vehicle: Option<VehicleInfo>) -> Result<(), SessionError> {
        let persisted = match &vehicle {
            Some(info) => {
                let content = serde_json::to_string_pretty(info)?;
                std::fs::write(&self.path, content)
            }
            None if self.path.exists() => std::fs::remove_file(&self.path),
            None => Ok(()),
        };

        self.vehicle.send_replace(vehicle);

        persisted.map_err(|source| SessionError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Subscribe to selection changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<VehicleInfo>> {
        self.vehicle.subscribe()
    }
}
