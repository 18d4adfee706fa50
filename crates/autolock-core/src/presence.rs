//! Scan-derived region and ranging provider.
//!
//! Linux has no system region-monitoring service, so the daemon derives both
//! kinds of proximity state from the live scan stream: a beacon is inside its
//! region (or in range) while its latest sighting in the [`BeaconSet`] is
//! fresh enough, and a threshold crossing becomes an enter/exit or
//! in-range/out-of-range callback into the watcher. Region state uses a
//! longer timeout than ranging, mirroring the sluggish-geofence /
//! fast-ranging split of platform location APIs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::beacons::BeaconSet;
use crate::config::PresenceConfig;
use crate::watcher::{MonitorError, ProximityWatcher, RangeHandle, RegionHandle, RegionMonitor};

/// How often presence state is re-evaluated.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Entry {
    identity: Uuid,
    /// Inside the region / in range. Starts pessimistic so the first fresh
    /// sighting produces an enter transition and an absent beacon produces
    /// nothing.
    engaged: bool,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u64,
    regions: HashMap<u64, Entry>,
    ranges: HashMap<u64, Entry>,
}

/// One region-state or ranging transition detected by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Region(Uuid, bool),
    Range(Uuid, bool),
}

/// [`RegionMonitor`] implementation backed by the beacon scan stream.
#[derive(Debug)]
pub struct ScanPresence {
    beacons: Arc<BeaconSet>,
    region_timeout: TimeDelta,
    range_timeout: TimeDelta,
    state: Mutex<State>,
}

impl ScanPresence {
    /// Create a provider over `beacons` with the configured timeouts.
    ///
    /// Timeouts beyond the representable range are clamped rather than
    /// rejected; a beacon then never goes stale.
    #[must_use]
    pub fn new(beacons: Arc<BeaconSet>, config: &PresenceConfig) -> Self {
        Self {
            beacons,
            region_timeout: Self::timeout(config.region_timeout_secs),
            range_timeout: Self::timeout(config.range_timeout_secs),
            state: Mutex::new(State::default()),
        }
    }

    fn timeout(secs: u64) -> TimeDelta {
        i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll loop: evaluate presence once per tick and feed transitions into
    /// the watcher.
    pub async fn run(self: Arc<Self>, watcher: Arc<ProximityWatcher>) {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.poll(&watcher);
        }
    }

    /// Evaluate presence once against the beacon set.
    ///
    /// Transitions are collected under the state lock but delivered after it
    /// is released; the watcher may call back into this provider while
    /// handling them.
    pub fn poll(&self, watcher: &ProximityWatcher) {
        let now = Utc::now();
        let transitions = {
            let mut state = self.state();
            let mut transitions = Vec::new();
            Self::sweep(
                &mut state.regions,
                &self.beacons,
                now,
                self.region_timeout,
                |identity, engaged| transitions.push(Transition::Region(identity, engaged)),
            );
            Self::sweep(
                &mut state.ranges,
                &self.beacons,
                now,
                self.range_timeout,
                |identity, engaged| transitions.push(Transition::Range(identity, engaged)),
            );
            transitions
        };

        for transition in transitions {
            match transition {
                Transition::Region(identity, inside) => watcher.on_region_state(identity, inside),
                Transition::Range(identity, present) => {
                    watcher.on_ranging_update(identity, present);
                }
            }
        }
    }

    fn sweep(
        entries: &mut HashMap<u64, Entry>,
        beacons: &BeaconSet,
        now: DateTime<Utc>,
        timeout: TimeDelta,
        mut transition: impl FnMut(Uuid, bool),
    ) {
        for entry in entries.values_mut() {
            let fresh = beacons
                .get(&entry.identity)
                .is_some_and(|record| now - record.last_seen_at <= timeout);
            if fresh != entry.engaged {
                entry.engaged = fresh;
                transition(entry.identity, fresh);
            }
        }
    }
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl RegionMonitor for ScanPresence {
    fn start_monitoring(&self, identity: Uuid) -> Result<RegionHandle, MonitorError> {
        let mut state = self.state();
        let raw = state.allocate();
        state.regions.insert(
            raw,
            Entry {
                identity,
                engaged: false,
            },
        );
        debug!(%identity, handle = raw, "region monitoring started");
        Ok(RegionHandle::new(raw))
    }

    fn stop_monitoring(&self, handle: RegionHandle) {
        self.state()
            .regions
            .retain(|raw, _| RegionHandle::new(*raw) != handle);
    }

    fn start_ranging(&self, identity: Uuid) -> Result<RangeHandle, MonitorError> {
        let mut state = self.state();
        let raw = state.allocate();
        state.ranges.insert(
            raw,
            Entry {
                identity,
                engaged: false,
            },
        );
        debug!(%identity, handle = raw, "ranging started");
        Ok(RangeHandle::new(raw))
    }

    fn stop_ranging(&self, handle: RangeHandle) {
        self.state()
            .ranges
            .retain(|raw, _| RangeHandle::new(*raw) != handle);
    }

    fn ranged_identities(&self) -> Vec<Uuid> {
        self.state()
            .ranges
            .values()
            .map(|entry| entry.identity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use crate::advert::BeaconRecord;
    use crate::notify::LogNotifier;
    use crate::watcher::ProximityEvent;

    use super::*;

    fn record(identity: Uuid, seen_secs_ago: i64) -> BeaconRecord {
        BeaconRecord {
            identity,
            manufacturer_id: 0x004C,
            major: 1,
            minor: 1,
            tx_power: -59,
            rssi: -70,
            last_seen_at: Utc::now() - TimeDelta::seconds(seen_secs_ago),
        }
    }

    fn fixture() -> (
        Arc<BeaconSet>,
        Arc<ScanPresence>,
        Arc<ProximityWatcher>,
        tokio::sync::mpsc::UnboundedReceiver<ProximityEvent>,
    ) {
        let beacons = Arc::new(BeaconSet::new());
        let presence = Arc::new(ScanPresence::new(
            Arc::clone(&beacons),
            &PresenceConfig {
                region_timeout_secs: 30,
                range_timeout_secs: 5,
            },
        ));
        let (watcher, rx) =
            ProximityWatcher::new(presence.clone() as Arc<dyn RegionMonitor>, Arc::new(LogNotifier));
        (beacons, presence, Arc::new(watcher), rx)
    }

    #[tokio::test]
    async fn fresh_sighting_produces_enter_and_in_range() {
        let (beacons, presence, watcher, mut rx) = fixture();
        let identity = Uuid::new_v4();
        watcher.start_watching(identity).unwrap();

        beacons.observe(record(identity, 0));
        presence.poll(&watcher);

        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::EnteredRegion(identity));
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::InRange(identity));
    }

    #[tokio::test]
    async fn absent_beacon_produces_no_initial_transition() {
        let (_, presence, watcher, mut rx) = fixture();
        watcher.start_watching(Uuid::new_v4()).unwrap();

        presence.poll(&watcher);
        presence.poll(&watcher);

        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn staleness_crosses_range_before_region() {
        let (beacons, presence, watcher, mut rx) = fixture();
        let identity = Uuid::new_v4();
        watcher.start_watching(identity).unwrap();

        beacons.observe(record(identity, 0));
        presence.poll(&watcher);
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::EnteredRegion(identity));
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::InRange(identity));

        // 10 s stale: beyond the 5 s range timeout, inside the 30 s region
        // timeout.
        beacons.observe(record(identity, 10));
        presence.poll(&watcher);
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::OutOfRange(identity));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

        // 60 s stale: region exit as well.
        beacons.observe(record(identity, 60));
        presence.poll(&watcher);
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::ExitedRegion(identity));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn transitions_fire_once_per_crossing() {
        let (beacons, presence, watcher, mut rx) = fixture();
        let identity = Uuid::new_v4();
        watcher.start_watching(identity).unwrap();

        beacons.observe(record(identity, 0));
        presence.poll(&watcher);
        presence.poll(&watcher);
        presence.poll(&watcher);

        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::EnteredRegion(identity));
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::InRange(identity));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn extreme_timeouts_clamp_instead_of_panicking() {
        let beacons = Arc::new(BeaconSet::new());
        let presence = Arc::new(ScanPresence::new(
            Arc::clone(&beacons),
            &PresenceConfig {
                region_timeout_secs: u64::MAX,
                range_timeout_secs: u64::MAX,
            },
        ));
        let (watcher, mut rx) =
            ProximityWatcher::new(presence.clone() as Arc<dyn RegionMonitor>, Arc::new(LogNotifier));
        let watcher = Arc::new(watcher);
        let identity = Uuid::new_v4();
        watcher.start_watching(identity).unwrap();

        // A clamped timeout keeps even an ancient sighting fresh.
        beacons.observe(record(identity, 1_000_000));
        presence.poll(&watcher);
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::EnteredRegion(identity));
        assert_eq!(rx.try_recv().unwrap(), ProximityEvent::InRange(identity));
    }

    #[tokio::test]
    async fn stopped_subscriptions_no_longer_report() {
        let (beacons, presence, watcher, mut rx) = fixture();
        let identity = Uuid::new_v4();
        watcher.start_watching(identity).unwrap();
        watcher.stop_watching();
        assert!(presence.ranged_identities().is_empty());

        beacons.observe(record(identity, 0));
        presence.poll(&watcher);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }
}
