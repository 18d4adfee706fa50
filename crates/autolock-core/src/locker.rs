//! Monitoring coordinator.
//!
//! [`LockerService`] is the reactive glue between the selected vehicle, that
//! vehicle's proximity settings, and the [`ProximityWatcher`]: on any change
//! to either source it re-derives the desired watch target and drives the
//! watcher's start/stop operations. All recomputation happens on the single
//! [`run`](LockerService::run) task, so start/stop calls never race each
//! other.
//!
//! Proximity events coming back from the watcher are logged and surfaced to
//! an external delegate channel; whatever unlock action the host performs on
//! them is its own policy.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::VehicleInfo;
use crate::settings::{ProximitySettings, SettingsStore};
use crate::watcher::{ProximityEvent, ProximityWatcher};

/// Derive the desired watch target from a vehicle's settings.
///
/// A beacon is watched iff one is bound *and* unlock-when-nearby is enabled.
#[must_use]
pub fn desired_watch_target(settings: Option<&ProximitySettings>) -> Option<Uuid> {
    settings.and_then(|s| if s.unlock_when_nearby { s.bound_beacon } else { None })
}

/// Reactive coordinator driving the proximity watcher.
pub struct LockerService {
    watcher: Arc<ProximityWatcher>,
    settings: Arc<SettingsStore>,
    vehicle_rx: watch::Receiver<Option<VehicleInfo>>,
    events: mpsc::UnboundedReceiver<ProximityEvent>,
    delegate: mpsc::UnboundedSender<ProximityEvent>,
}

impl LockerService {
    /// Create the coordinator.
    ///
    /// * `vehicle_rx` — reactive current-vehicle selection.
    /// * `events` — the receiving end of the watcher's event channel.
    /// * `delegate` — where proximity events are surfaced for the host.
    #[must_use]
    pub fn new(
        watcher: Arc<ProximityWatcher>,
        settings: Arc<SettingsStore>,
        vehicle_rx: watch::Receiver<Option<VehicleInfo>>,
        events: mpsc::UnboundedReceiver<ProximityEvent>,
        delegate: mpsc::UnboundedSender<ProximityEvent>,
    ) -> Self {
        Self {
            watcher,
            settings,
            vehicle_rx,
            events,
            delegate,
        }
    }

    /// Run the coordination loop until every input source is gone.
    ///
    /// Applies the current vehicle immediately, then reacts to vehicle
    /// changes, settings changes for the selected vehicle, and proximity
    /// events. Switching the vehicle drops the previous settings
    /// subscription before installing the new one, so settings of a vehicle
    /// that is no longer selected are never evaluated.
    pub async fn run(mut self) {
        // Exactly one replaceable per-vehicle settings subscription.
        let mut settings_rx: Option<watch::Receiver<Option<ProximitySettings>>> = None;

        let initial = self.vehicle_rx.borrow_and_update().clone();
        self.apply_vehicle(&mut settings_rx, initial.as_ref());

        loop {
            tokio::select! {
                changed = self.vehicle_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let vehicle = self.vehicle_rx.borrow_and_update().clone();
                    self.apply_vehicle(&mut settings_rx, vehicle.as_ref());
                }

                changed = Self::settings_changed(&mut settings_rx) => {
                    if changed {
                        if let Some(rx) = settings_rx.as_mut() {
                            let settings = rx.borrow_and_update().clone();
                            self.apply_settings(settings.as_ref());
                        }
                    } else {
                        // Settings store went away; nothing left to watch.
                        settings_rx = None;
                        self.apply_settings(None);
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.surface(event),
                        None => break,
                    }
                }
            }
        }

        self.watcher.stop_watching();
    }

    /// Wait for the active settings subscription to change.
    ///
    /// Pends forever while no subscription is held so the other `select!`
    /// branches stay live. Resolves `false` when the subscription's sender
    /// is gone.
    async fn settings_changed(rx: &mut Option<watch::Receiver<Option<ProximitySettings>>>) -> bool {
        match rx.as_mut() {
            Some(rx) => rx.changed().await.is_ok(),
            None => std::future::pending().await,
        }
    }

    fn apply_vehicle(
        &self,
        slot: &mut Option<watch::Receiver<Option<ProximitySettings>>>,
        vehicle: Option<&VehicleInfo>,
    ) {
        // Dispose the previous subscription before establishing the new one.
        *slot = None;

        match vehicle {
            None => {
                debug!("no vehicle selected");
                self.apply_settings(None);
            }
            Some(vehicle) => {
                debug!(vehicle = %vehicle.id, "vehicle selected");
                let rx = self.settings.watch_vehicle(&vehicle.id);
                let current = rx.borrow().clone();
                *slot = Some(rx);
                self.apply_settings(current.as_ref());
            }
        }
    }

    fn apply_settings(&self, settings: Option<&ProximitySettings>) {
        match desired_watch_target(settings) {
            Some(identity) => {
                if let Err(err) = self.watcher.start_watching(identity) {
                    // Leave the watcher idle; retry is a user action.
                    warn!(%identity, %err, "could not start watching beacon");
                }
            }
            None => self.watcher.stop_watching(),
        }
    }

    fn surface(&self, event: ProximityEvent) {
        match event {
            ProximityEvent::EnteredRegion(identity) => info!(%identity, "beacon entered region"),
            ProximityEvent::ExitedRegion(identity) => info!(%identity, "beacon exited region"),
            ProximityEvent::InRange(identity) => info!(%identity, "beacon in range"),
            ProximityEvent::OutOfRange(identity) => info!(%identity, "beacon out of range"),
        }
        let _ = self.delegate.send(event);
    }
}

impl std::fmt::Debug for LockerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockerService")
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::watcher::tests::{FakeMonitor, FakeNotifier};
    use crate::watcher::RegionMonitor;

    use super::*;

    struct Fixture {
        monitor: Arc<FakeMonitor>,
        watcher: Arc<ProximityWatcher>,
        settings: Arc<SettingsStore>,
        vehicle_tx: watch::Sender<Option<VehicleInfo>>,
        delegate_rx: mpsc::UnboundedReceiver<ProximityEvent>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(FakeMonitor::default());
        let (watcher, events) =
            ProximityWatcher::new(monitor.clone(), Arc::new(FakeNotifier::default()));
        let watcher = Arc::new(watcher);
        let settings = Arc::new(SettingsStore::open(dir.path()).unwrap());
        let (vehicle_tx, vehicle_rx) = watch::channel(None);
        let (delegate_tx, delegate_rx) = mpsc::unbounded_channel();

        let service = LockerService::new(
            watcher.clone(),
            settings.clone(),
            vehicle_rx,
            events,
            delegate_tx,
        );
        tokio::spawn(service.run());

        Fixture {
            monitor,
            watcher,
            settings,
            vehicle_tx,
            delegate_rx,
            _dir: dir,
        }
    }

    fn vehicle(id: &str) -> VehicleInfo {
        VehicleInfo {
            id: id.to_string(),
            plate_no: None,
            brand: None,
            model: None,
        }
    }

    /// Poll until `check` passes or a second elapses.
    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[test]
    fn desired_target_requires_bound_beacon_and_enabled_flag() {
        let beacon = Uuid::new_v4();
        let bound_enabled = ProximitySettings {
            bound_beacon: Some(beacon),
            unlock_when_nearby: true,
        };
        let bound_disabled = ProximitySettings {
            bound_beacon: Some(beacon),
            unlock_when_nearby: false,
        };
        let unbound_enabled = ProximitySettings {
            bound_beacon: None,
            unlock_when_nearby: true,
        };

        assert_eq!(desired_watch_target(Some(&bound_enabled)), Some(beacon));
        assert_eq!(desired_watch_target(Some(&bound_disabled)), None);
        assert_eq!(desired_watch_target(Some(&unbound_enabled)), None);
        assert_eq!(desired_watch_target(None), None);
    }

    #[tokio::test]
    async fn selecting_a_configured_vehicle_starts_watching() {
        let f = fixture();
        let beacon = Uuid::new_v4();
        f.settings.set_bound_beacon("car-1", Some(beacon)).unwrap();
        f.settings.set_unlock_when_nearby("car-1", true).unwrap();

        f.vehicle_tx.send(Some(vehicle("car-1"))).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon)).await;
        assert_eq!(f.monitor.ranged_identities(), vec![beacon]);
    }

    #[tokio::test]
    async fn toggling_unlock_when_nearby_stops_and_restarts_watching() {
        let f = fixture();
        let beacon = Uuid::new_v4();
        f.settings.set_bound_beacon("car-1", Some(beacon)).unwrap();
        f.settings.set_unlock_when_nearby("car-1", true).unwrap();
        f.vehicle_tx.send(Some(vehicle("car-1"))).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon)).await;

        f.settings.set_unlock_when_nearby("car-1", false).unwrap();
        wait_for(|| f.watcher.watched_identity().is_none()).await;

        f.settings.set_unlock_when_nearby("car-1", true).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon)).await;
    }

    #[tokio::test]
    async fn enabled_flag_without_bound_beacon_keeps_watcher_idle() {
        let f = fixture();
        f.settings.set_unlock_when_nearby("car-1", true).unwrap();
        f.vehicle_tx.send(Some(vehicle("car-1"))).unwrap();

        // Give the loop time to evaluate; it must choose stop, not start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.watcher.watched_identity(), None);
        assert!(f.monitor.ranged_identities().is_empty());
    }

    #[tokio::test]
    async fn switching_vehicle_replaces_the_settings_subscription() {
        let f = fixture();
        let beacon_a = Uuid::new_v4();
        f.settings.set_bound_beacon("car-a", Some(beacon_a)).unwrap();
        f.settings.set_unlock_when_nearby("car-a", true).unwrap();

        f.vehicle_tx.send(Some(vehicle("car-a"))).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon_a)).await;

        // Switch to an unconfigured vehicle: watching must stop.
        f.vehicle_tx.send(Some(vehicle("car-b"))).unwrap();
        wait_for(|| f.watcher.watched_identity().is_none()).await;

        // A later change to the no-longer-selected vehicle must not be
        // evaluated.
        let beacon_a2 = Uuid::new_v4();
        f.settings.set_bound_beacon("car-a", Some(beacon_a2)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.watcher.watched_identity(), None);
    }

    #[tokio::test]
    async fn deselecting_the_vehicle_stops_watching() {
        let f = fixture();
        let beacon = Uuid::new_v4();
        f.settings.set_bound_beacon("car-1", Some(beacon)).unwrap();
        f.settings.set_unlock_when_nearby("car-1", true).unwrap();
        f.vehicle_tx.send(Some(vehicle("car-1"))).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon)).await;

        f.vehicle_tx.send(None).unwrap();
        wait_for(|| f.watcher.watched_identity().is_none()).await;
    }

    #[tokio::test]
    async fn proximity_events_are_surfaced_to_the_delegate() {
        let mut f = fixture();
        let beacon = Uuid::new_v4();
        f.settings.set_bound_beacon("car-1", Some(beacon)).unwrap();
        f.settings.set_unlock_when_nearby("car-1", true).unwrap();
        f.vehicle_tx.send(Some(vehicle("car-1"))).unwrap();
        wait_for(|| f.watcher.watched_identity() == Some(beacon)).await;

        f.watcher.on_region_state(beacon, true);
        f.watcher.on_ranging_update(beacon, true);

        let first = tokio::time::timeout(Duration::from_secs(1), f.delegate_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), f.delegate_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, ProximityEvent::EnteredRegion(beacon));
        assert_eq!(second, ProximityEvent::InRange(beacon));
    }
}
