//! Live set of observed beacons.
//!
//! The scanner feeds every successfully decoded advertisement into a
//! [`BeaconSet`]. The set keeps exactly one record per beacon identity and
//! replaces it wholesale on every new sighting (last write wins). Entries are
//! never evicted here; a consumer that wants a staleness cutoff can filter on
//! [`BeaconRecord::last_seen_at`] itself.

use std::collections::HashMap;

use tokio::sync::watch;
use uuid::Uuid;

use crate::advert::BeaconRecord;

/// Map of beacon identity to its latest observed record.
pub type BeaconMap = HashMap<Uuid, BeaconRecord>;

/// Deduplicated, continuously updated collection of observed beacons.
///
/// Observations may arrive concurrently from multiple advertisement events;
/// each [`observe`](Self::observe) is applied atomically with respect to the
/// others, and [`snapshot`](Self::snapshot) returns a point-in-time copy that
/// is safe to iterate while further observations land.
#[derive(Debug)]
pub struct BeaconSet {
    map: watch::Sender<BeaconMap>,
}

impl BeaconSet {
    /// Create an empty beacon set.
    #[must_use]
    pub fn new() -> Self {
        let (map, _) = watch::channel(BeaconMap::new());
        Self { map }
    }

    /// Insert or replace the record for its identity.
    ///
    /// Replacement is whole-record: the new sighting fully supersedes the
    /// previous one, including `rssi` and `last_seen_at`. Never fails;
    /// malformed advertisements are rejected upstream by the decoder.
    pub fn observe(&self, record: BeaconRecord) {
        self.map.send_modify(|map| {
            map.insert(record.identity, record);
        });
    }

    /// A consistent point-in-time copy of all known beacons.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BeaconRecord> {
        self.map.borrow().values().cloned().collect()
    }

    /// Latest record for one beacon, if it has ever been observed.
    #[must_use]
    pub fn get(&self, identity: &Uuid) -> Option<BeaconRecord> {
        self.map.borrow().get(identity).cloned()
    }

    /// Number of distinct beacons observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    /// Whether no beacon has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    /// Subscribe to changes of the full beacon map.
    ///
    /// The receiver is notified after every applied observation; a list UI can
    /// re-render from [`watch::Receiver::borrow`] without touching the live
    /// map.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BeaconMap> {
        self.map.subscribe()
    }
}

impl Default for BeaconSet {
    fn default() -> Self {
        Self::new()
    }
}
