//! # autolockd
//!
//! Host daemon wiring the autolock core together: the BlueZ scanner feeds
//! the beacon set, the scan-derived presence provider feeds the proximity
//! watcher, and the coordinator keeps the watch target in line with the
//! selected vehicle's settings. Vehicle selection and per-vehicle settings
//! are picked up from the data directory; a UI or API frontend mutates them
//! through the same stores.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use autolock_core::{
    AppConfig, BeaconSet, LockerService, LogNotifier, ProximityWatcher, ScanPresence, SessionStore,
    SettingsStore,
};

mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let production = std::env::var("AUTOLOCK_ENV").as_deref() == Ok("production");
    logging::init(production)?;

    if let Err(err) = run().await {
        error!(
            %err,
            storage = err.is_storage_error(),
            recoverable = err.is_recoverable(),
            "daemon failed"
        );
        return Err(err.into());
    }
    Ok(())
}

async fn run() -> autolock_core::Result<()> {
    info!("starting autolockd");

    let config = AppConfig::load()?;
    let data_dir = config.data_dir()?;

    let settings = Arc::new(SettingsStore::open(data_dir.join("vehicle_settings"))?);
    let session = SessionStore::open(&data_dir);
    if let Some(vehicle) = session.current() {
        info!(vehicle = %vehicle.id, "restored vehicle selection");
    }

    let beacons = Arc::new(BeaconSet::new());
    let presence = Arc::new(ScanPresence::new(Arc::clone(&beacons), &config.presence));
    let (watcher, events) = ProximityWatcher::new(presence.clone(), Arc::new(LogNotifier));
    let watcher = Arc::new(watcher);

    let (delegate_tx, mut delegate_rx) = mpsc::unbounded_channel();
    let locker = LockerService::new(
        Arc::clone(&watcher),
        Arc::clone(&settings),
        session.subscribe(),
        events,
        delegate_tx,
    );

    tokio::spawn(Arc::clone(&presence).run(Arc::clone(&watcher)));
    tokio::spawn(locker.run());

    // The daemon takes no unlock action itself; drain the delegate so events
    // stay observable at debug level.
    tokio::spawn(async move {
        while let Some(event) = delegate_rx.recv().await {
            debug!(?event, "proximity event surfaced");
        }
    });

    #[cfg(feature = "bluetooth")]
    {
        use autolock_core::AutolockError;

        let adapter = config.adapter.clone();
        let beacons = Arc::clone(&beacons);
        tokio::spawn(async move {
            match autolock_core::BeaconScanner::new(adapter.as_deref()).await {
                Ok(scanner) => {
                    if let Err(err) = scanner.run(beacons).await {
                        let err = AutolockError::from(err);
                        error!(%err, recoverable = err.is_recoverable(), "beacon scanning failed");
                    }
                }
                Err(err) => {
                    let err = AutolockError::from(err);
                    error!(%err, bluetooth = err.is_bluetooth_error(), "cannot start beacon scanner");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    watcher.stop_watching();
    Ok(())
}
