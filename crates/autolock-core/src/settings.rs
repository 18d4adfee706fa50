//! Per-vehicle proximity settings store.
//!
//! Each vehicle's settings live in their own JSON file under
//! `<data_dir>/vehicle_settings/<vehicle_id>.json`. The whole directory is
//! loaded at startup; every mutation writes through to disk and publishes the
//! updated map. [`SettingsStore::watch_vehicle`] projects the map publisher
//! down to a single vehicle so a consumer holds exactly one replaceable
//! subscription per vehicle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Per-vehicle proximity configuration, mutated by user action only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximitySettings {
    /// Identity of the beacon bound to this vehicle, if any.
    pub bound_beacon: Option<Uuid>,

    /// Whether the vehicle should be watched (and unlocked) when the bound
    /// beacon is nearby.
    #[serde(default)]
    pub unlock_when_nearby: bool,
}

/// Vehicle ids become file names; restrict them accordingly.
static VEHICLE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static pattern"));

/// Returns `true` if `vehicle_id` is safe to use as a settings key.
#[must_use]
pub fn is_valid_vehicle_id(vehicle_id: &str) -> bool {
    VEHICLE_ID_RE.is_match(vehicle_id)
}

/// Settings persistence failure.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The vehicle id is not usable as a settings key.
    #[error("invalid vehicle id: '{0}'")]
    InvalidVehicleId(String),

    /// A settings file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A settings file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Settings JSON could not be parsed or produced.
    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type SettingsMap = HashMap<String, ProximitySettings>;

/// Store of per-vehicle [`ProximitySettings`] with change subscriptions.
#[derive(Debug)]
pub struct SettingsStore {
    dir: PathBuf,
    map: watch::Sender<SettingsMap>,
}

impl SettingsStore {
    /// Open the store rooted at `dir`, loading every existing settings file.
    ///
    /// Unparseable files are skipped with a warning rather than failing the
    /// whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SettingsError::Write {
            path: dir.clone(),
            source,
        })?;

        let mut map = SettingsMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|source| SettingsError::Read {
            path: dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(vehicle_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::load_file(&path) {
                Ok(settings) => {
                    map.insert(vehicle_id.to_string(), settings);
                }
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable settings file"),
            }
        }

        let (tx, _) = watch::channel(map);
        Ok(Self { dir, map: tx })
    }

    fn load_file(path: &Path) -> Result<ProximitySettings, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Settings for one vehicle; defaults if none were ever saved.
    #[must_use]
    pub fn get(&self, vehicle_id: &str) -> ProximitySettings {
        self.map
            .borrow()
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Bind (or clear) the beacon for a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the file cannot be written.
    pub fn set_bound_beacon(
        &self,
        vehicle_id: &str,
        beacon: Option<Uuid>,
    ) -> Result<(), SettingsError> {
        self.update(vehicle_id, |settings| settings.bound_beacon = beacon)
    }

    /// Enable or disable unlock-when-nearby for a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the file cannot be written.
    pub fn set_unlock_when_nearby(
        &self,
        vehicle_id: &str,
        enabled: bool,
    ) -> Result<(), SettingsError> {
        self.update(vehicle_id, |settings| settings.unlock_when_nearby = enabled)
    }

    /// Remove a vehicle's settings entirely, including its file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the file cannot be removed.
    pub fn remove(&self, vehicle_id: &str) -> Result<(), SettingsError> {
        if !is_valid_vehicle_id(vehicle_id) {
            return Err(SettingsError::InvalidVehicleId(vehicle_id.to_string()));
        }
        let path = self.file_path(vehicle_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| SettingsError::Write { path, source })?;
        }
        self.map.send_modify(|map| {
            map.remove(vehicle_id);
        });
        Ok(())
    }

    /// Subscribe to one vehicle's settings.
    ///
    /// The receiver starts with the current value and is notified whenever
    /// that vehicle's settings change; changes to other vehicles do not wake
    /// it. The projection task ends when the receiver (or the store) is
    /// dropped, so replacing the receiver is all a caller needs to do to
    /// switch vehicles.
    #[must_use]
    pub fn watch_vehicle(&self, vehicle_id: &str) -> watch::Receiver<Option<ProximitySettings>> {
        let mut map_rx = self.map.subscribe();
        let (tx, rx) = watch::channel(map_rx.borrow().get(vehicle_id).cloned());
        let key = vehicle_id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = map_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let value = map_rx.borrow_and_update().get(&key).cloned();
                        tx.send_if_modified(|slot| {
                            if *slot == value {
                                false
                            } else {
                                *slot = value;
                                true
                            }
                        });
                    }
                    () = tx.closed() => break,
                }
            }
        });

        rx
    }

    fn update(
        &self,
        vehicle_id: &str,
        mutate: impl FnOnce(&mut ProximitySettings),
    ) -> Result<(), SettingsError> {
        if !is_valid_vehicle_id(vehicle_id) {
            return Err(SettingsError::InvalidVehicleId(vehicle_id.to_string()));
        }

        let mut settings = self.get(vehicle_id);
        mutate(&mut settings);
        self.persist(vehicle_id, &settings)?;
        self.map.send_modify(|map| {
            map.insert(vehicle_id.to_string(), settings);
        });
        Ok(())
    }

    fn persist(&self, vehicle_id: &str, settings: &ProximitySettings) -> Result<(), SettingsError> {
        let path = self.file_path(vehicle_id);
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&path, content).map_err(|source| SettingsError::Write { path, source })
    }

    fn file_path(&self, vehicle_id: &str) -> PathBuf {
        self.dir.join(format!("{vehicle_id}.json"))
    }
}
