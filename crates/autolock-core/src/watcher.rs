//! Region-monitoring and ranging state machine.
//!
//! A [`ProximityWatcher`] owns the single watched beacon identity and the
//! subscriptions held against the region subsystem for it. It has exactly two
//! externally observable states: idle, and watching one identity with both a
//! region-monitoring and a ranging subscription active. Hardware enter/exit
//! and in-range/out-of-range callbacks are converted into
//! [`ProximityEvent`] values on an event channel; callbacks for any identity
//! other than the watched one are silently discarded, which also makes
//! late-arriving callbacks after [`stop_watching`](ProximityWatcher::stop_watching)
//! harmless.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::notify::Notifier;

/// Notification shown when the watched beacon enters its region.
pub const ENTER_NOTIFICATION: (&str, &str) = ("Beacon detected", "Beacon region entered");

/// Notification shown when the watched beacon exits its region.
pub const EXIT_NOTIFICATION: (&str, &str) = ("Beacon lost", "Beacon region exited");

/// Opaque handle to an active region-monitoring subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(u64);

impl RegionHandle {
    /// Wrap a raw subsystem-allocated handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Opaque handle to an active ranging subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeHandle(u64);

impl RangeHandle {
    /// Wrap a raw subsystem-allocated handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Failure reported by the region subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The platform refused location/monitoring permission.
    ///
    /// Reported once per start attempt; the watcher stays idle and does not
    /// retry on its own. Retry is a user-initiated action.
    #[error("location permission denied by the platform")]
    PermissionDenied,

    /// Any other subsystem failure.
    #[error("region subsystem failure: {0}")]
    Subsystem(String),
}

/// Region-monitoring and ranging provider boundary.
///
/// The watcher issues these calls against whatever proximity backend the host
/// supplies (a scan-derived provider on Linux, a fake in tests). The backend
/// may support many simultaneous regions; the watcher deliberately holds at
/// most one of each subscription kind.
pub trait RegionMonitor: Send + Sync {
    /// Begin region monitoring for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PermissionDenied`] if the platform refuses.
    fn start_monitoring(&self, identity: Uuid) -> Result<RegionHandle, MonitorError>;

    /// Cancel a region-monitoring subscription.
    fn stop_monitoring(&self, handle: RegionHandle);

    /// Begin ranging for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PermissionDenied`] if the platform refuses.
    fn start_ranging(&self, identity: Uuid) -> Result<RangeHandle, MonitorError>;

    /// Cancel a ranging subscription.
    fn stop_ranging(&self, handle: RangeHandle);

    /// Identities with a ranging subscription currently active.
    ///
    /// Consulted before subscribing: registering a duplicate ranging
    /// constraint is a defined hazard of the underlying radio API (duplicate
    /// callback delivery).
    fn ranged_identities(&self) -> Vec<Uuid>;
}

/// Application-level proximity event for the watched beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityEvent {
    /// The watched beacon entered its monitored region.
    EnteredRegion(Uuid),
    /// The watched beacon exited its monitored region.
    ExitedRegion(Uuid),
    /// Ranging reports the watched beacon present.
    InRange(Uuid),
    /// Ranging reports the watched beacon absent.
    OutOfRange(Uuid),
}

/// The single active watch target and its subscription handles.
///
/// Invariant: both handles always belong to `identity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WatchTarget {
    identity: Uuid,
    region: RegionHandle,
    /// Absent only if the subsystem already held a ranging subscription for
    /// this identity when we started (duplicate suppressed, not re-owned).
    range: Option<RangeHandle>,
}

/// The proximity state machine.
pub struct ProximityWatcher {
    monitor: Arc<dyn RegionMonitor>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<ProximityEvent>,
    target: Mutex<Option<WatchTarget>>,
}

impl ProximityWatcher {
    /// Create a watcher in the idle state.
    ///
    /// Returns the watcher together with the receiving end of its event
    /// channel.
    #[must_use]
    pub fn new(
        monitor: Arc<dyn RegionMonitor>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<ProximityEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                monitor,
                notifier,
                events,
                target: Mutex::new(None),
            },
            rx,
        )
    }

    fn target(&self) -> MutexGuard<'_, Option<WatchTarget>> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The identity currently being watched, if any.
    #[must_use]
    pub fn watched_identity(&self) -> Option<Uuid> {
        self.target().map(|t| t.identity)
    }

    /// Start watching `identity`.
    ///
    /// Idempotent: if `identity` is already the watch target this is a no-op
    /// and no duplicate subscription is registered. Watching a different
    /// identity first cancels the previous subscriptions, then establishes
    /// fresh ones.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PermissionDenied`] (or another subsystem
    /// failure) if a subscription could not be established; the watcher is
    /// left idle and will not retry by itself.
    pub fn start_watching(&self, identity: Uuid) -> Result<(), MonitorError> {
        let mut target = self.target();

        if let Some(current) = target.as_ref() {
            if current.identity == identity {
                debug!(%identity, "already watching, duplicate subscription avoided");
                return Ok(());
            }
            Self::teardown(&*self.monitor, current);
            *target = None;
        }

        let region = self.monitor.start_monitoring(identity)?;

        // The hardware API tolerates duplicate region registrations but
        // duplicate ranging constraints cause duplicate callback delivery.
        // Compare against every currently active constraint before
        // subscribing.
        let range = if self.monitor.ranged_identities().contains(&identity) {
            debug!(%identity, "ranging constraint already active, duplicate subscription avoided");
            None
        } else {
            match self.monitor.start_ranging(identity) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    self.monitor.stop_monitoring(region);
                    return Err(err);
                }
            }
        };

        info!(%identity, "watching beacon");
        *target = Some(WatchTarget {
            identity,
            region,
            range,
        });
        Ok(())
    }

    /// Stop watching. No-op when idle.
    pub fn stop_watching(&self) {
        let mut target = self.target();
        if let Some(current) = target.take() {
            Self::teardown(&*self.monitor, &current);
            info!(identity = %current.identity, "stopped watching beacon");
        }
    }

    fn teardown(monitor: &dyn RegionMonitor, target: &WatchTarget) {
        monitor.stop_monitoring(target.region);
        if let Some(range) = target.range {
            monitor.stop_ranging(range);
        }
    }

    /// Hardware callback: the region state for `identity` changed.
    ///
    /// Ignored unless `identity` is the current watch target, so callbacks
    /// still in flight after [`stop_watching`](Self::stop_watching) are
    /// discarded here.
    pub fn on_region_state(&self, identity: Uuid, inside: bool) {
        if self.watched_identity() != Some(identity) {
            debug!(%identity, "discarding region callback for unwatched identity");
            return;
        }

        let (event, (title, body)) = if inside {
            (ProximityEvent::EnteredRegion(identity), ENTER_NOTIFICATION)
        } else {
            (ProximityEvent::ExitedRegion(identity), EXIT_NOTIFICATION)
        };
        self.notifier.notify(title, body);
        let _ = self.events.send(event);
    }

    /// Hardware callback: a ranging update for `identity` arrived.
    ///
    /// Ignored unless `identity` is the current watch target.
    pub fn on_ranging_update(&self, identity: Uuid, present: bool) {
        if self.watched_identity() != Some(identity) {
            debug!(%identity, "discarding ranging callback for unwatched identity");
            return;
        }

        let event = if present {
            ProximityEvent::InRange(identity)
        } else {
            ProximityEvent::OutOfRange(identity)
        };
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for ProximityWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityWatcher")
            .field("watched_identity", &self.watched_identity())
            .finish_non_exhaustive()
    }
}
