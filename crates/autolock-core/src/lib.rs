//! # autolock-core
//!
//! Core beacon sensing and proximity logic for autolock: bind a BLE
//! proximity beacon to a vehicle and watch it so the vehicle can be unlocked
//! automatically when the beacon is nearby.
//!
//! The sensing pipeline runs scan → decode → beacon set, while the control
//! side runs settings/vehicle selection → coordinator → proximity watcher →
//! events.
//!
//! ## Architecture
//!
//! - [`advert`] - iBeacon advertisement decoding (pure)
//! - [`beacons`] - deduplicated live set of observed beacons
//! - [`watcher`] - region-monitoring/ranging state machine
//! - [`presence`] - scan-derived region/ranging provider
//! - [`locker`] - reactive coordinator deriving the watch target
//! - [`settings`] - per-vehicle proximity settings store
//! - [`session`] - selected-vehicle session state
//! - [`bluetooth`] - BlueZ scan source (feature `bluetooth`)
//! - [`notify`] - user-facing notification capability
//! - [`config`] - application configuration
//! - [`error`] - unified error type

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advert;
pub mod beacons;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod locker;
pub mod notify;
pub mod presence;
pub mod session;
pub mod settings;
pub mod types;
pub mod watcher;

// Re-export primary types for convenience
pub use advert::{decode, BeaconRecord, DecodeRejection};
pub use beacons::BeaconSet;
#[cfg(feature = "bluetooth")]
pub use bluetooth::{BeaconScanner, ScanError};
pub use config::{AppConfig, ConfigError, PresenceConfig};
pub use error::{AutolockError, Result};
pub use locker::{desired_watch_target, LockerService};
pub use notify::{LogNotifier, Notifier};
pub use presence::ScanPresence;
pub use session::{SessionStore, VehicleInfo};
pub use settings::{is_valid_vehicle_id, ProximitySettings, SettingsStore};
pub use types::{Reading, VehicleStatus};
pub use watcher::{
    MonitorError, ProximityEvent, ProximityWatcher, RangeHandle, RegionHandle, RegionMonitor,
};
