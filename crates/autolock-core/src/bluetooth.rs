//! BLE advertisement scanning via BlueZ.
//!
//! The scanner streams adapter events, reads each device's manufacturer data
//! and RSSI, and feeds decoded beacon sightings into a [`BeaconSet`]. BlueZ
//! keys manufacturer data by company id and strips it from the payload, so
//! the 25-byte iBeacon frame is reassembled before decoding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bluer::{Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::advert;
use crate::beacons::BeaconSet;

/// Bluetooth scanning failure.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No usable Bluetooth adapter on this system.
    #[error("no Bluetooth adapter found; ensure hardware is present and bluetoothd is running")]
    AdapterNotFound,

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off; run 'bluetoothctl power on'")]
    AdapterPoweredOff,

    /// BlueZ session failure.
    #[error("BlueZ session error: {0}")]
    Session(#[source] bluer::Error),

    /// Device discovery could not be started.
    #[error("failed to start discovery: {0}")]
    Discovery(#[source] bluer::Error),
}

/// Continuous BLE beacon scanner.
pub struct BeaconScanner {
    adapter: Adapter,
    scanning: Arc<AtomicBool>,
}

impl BeaconScanner {
    /// Connect to BlueZ and select an adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::AdapterNotFound`] if the named (or default)
    /// adapter does not exist and [`ScanError::AdapterPoweredOff`] if it is
    /// not powered.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self, ScanError> {
        let session = bluer::Session::new().await.map_err(ScanError::Session)?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name).map_err(|_| ScanError::AdapterNotFound)?,
            None => session
                .default_adapter()
                .await
                .map_err(|_| ScanError::AdapterNotFound)?,
        };
        if !adapter.is_powered().await.map_err(ScanError::Session)? {
            return Err(ScanError::AdapterPoweredOff);
        }
        Ok(Self {
            adapter,
            scanning: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether discovery is currently running. Queried by the UI boundary;
    /// the core performs no reconnection or backoff of its own.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Run discovery until the adapter stream ends, feeding sightings into
    /// `beacons`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Discovery`] if discovery cannot be started.
    pub async fn run(&self, beacons: Arc<BeaconSet>) -> Result<(), ScanError> {
        let mut events = self
            .adapter
            .discover_devices()
            .await
            .map_err(ScanError::Discovery)?;
        self.scanning.store(true, Ordering::SeqCst);
        info!(adapter = self.adapter.name(), "beacon scanning started");

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(addr) = event {
                match self.adapter.device(addr) {
                    Ok(device) => {
                        let beacons = Arc::clone(&beacons);
                        tokio::spawn(async move {
                            if let Err(err) = track_device(device, &beacons).await {
                                debug!(%addr, %err, "device tracking ended");
                            }
                        });
                    }
                    Err(err) => debug!(%addr, %err, "cannot open discovered device"),
                }
            }
        }

        self.scanning.store(false, Ordering::SeqCst);
        info!("beacon scanning stopped");
        Ok(())
    }
}

/// Follow one device: ingest its current advertisement, then every RSSI or
/// manufacturer-data change until the device goes away.
async fn track_device(device: Device, beacons: &BeaconSet) -> bluer::Result<()> {
    ingest(&device, beacons).await?;
    let mut events = device.events().await?;
    while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
        match property {
            DeviceProperty::Rssi(_) | DeviceProperty::ManufacturerData(_) => {
                ingest(&device, beacons).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn ingest(device: &Device, beacons: &BeaconSet) -> bluer::Result<()> {
    // Per-advertisement RSSI arrives out-of-band from the payload.
    let Some(rssi) = device.rssi().await? else {
        return Ok(());
    };
    let Some(data) = device.manufacturer_data().await? else {
        return Ok(());
    };

    for (company_id, payload) in data {
        let frame = assemble_frame(company_id, &payload);
        match advert::decode(&frame, rssi) {
            Ok(record) => {
                trace!(identity = %record.identity, rssi, "beacon sighted");
                beacons.observe(record);
            }
            Err(rejection) => trace!(%rejection, "advertisement dropped"),
        }
    }
    Ok(())
}

/// Re-prefix the little-endian company id that BlueZ strips from the
/// manufacturer payload.
fn assemble_frame(company_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&company_id.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn assembled_frame_decodes_like_the_radio_layer() {
        let identity = Uuid::new_v4();
        // BlueZ-style payload: 23 bytes, company id held separately as the
        // map key.
        let mut payload = vec![0x02, 0x15];
        payload.extend_from_slice(identity.as_bytes());
        payload.extend_from_slice(&[0x01, 0x00, 0x00, 0x07, 0xC4]);

        let frame = assemble_frame(0x004C, &payload);
        assert_eq!(frame.len(), advert::FRAME_LEN);
        assert_eq!(&frame[..2], &[0x4C, 0x00]);

        let record = advert::decode(&frame, -63).unwrap();
        assert_eq!(record.identity, identity);
        assert_eq!(record.manufacturer_id, 0x004C);
        assert_eq!(record.major, 0x0100);
        assert_eq!(record.minor, 0x0007);
        assert_eq!(record.tx_power, -60);
        assert_eq!(record.rssi, -63);
    }

    #[test]
    fn non_beacon_manufacturer_data_is_rejected() {
        let frame = assemble_frame(0x0075, &[0x42, 0x04, 0x01, 0x80]);
        assert!(advert::decode(&frame, -40).is_err());
    }
}
