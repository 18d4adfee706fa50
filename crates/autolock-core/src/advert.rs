//! iBeacon advertisement decoding.
//!
//! A beacon advertisement carries a fixed 25-byte manufacturer payload:
//!
//! ```text
//! [0..2)   company code, little-endian (Apple is 0x004C)
//! [2]      frame type, always 0x02 for iBeacon
//! [3]      data length, always 0x15 (21 bytes follow)
//! [4..20)  beacon identity, a 128-bit UUID in standard byte order
//! [20..22) major, big-endian
//! [22..24) minor, big-endian
//! [24]     calibrated tx power at 1 m, signed two's complement
//! ```
//!
//! [`decode`] is a pure function: identical input always produces the same
//! record (modulo `last_seen_at`), and rejected frames leave no state behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Exact length of an iBeacon manufacturer payload.
pub const FRAME_LEN: usize = 25;

/// Frame type byte identifying an iBeacon advertisement.
const BEACON_TYPE: u8 = 0x02;

/// Declared data length byte for an iBeacon advertisement.
const BEACON_DATA_LEN: u8 = 0x15;

/// A validated observation of a single physical beacon.
///
/// `identity` is the stable primary key; `rssi` and `last_seen_at` describe
/// the most recent sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRecord {
    /// 128-bit UUID identifying the physical beacon.
    pub identity: Uuid,

    /// Radio-advertised vendor code (0x004C for Apple-format beacons).
    pub manufacturer_id: u16,

    /// Beacon sub-identifier, big-endian on the wire.
    pub major: u16,

    /// Beacon sub-identifier, big-endian on the wire.
    pub minor: u16,

    /// Calibrated reference signal strength at 1 m, in dBm.
    pub tx_power: i8,

    /// Received signal strength of this sighting, in dBm.
    pub rssi: i16,

    /// When this sighting was decoded.
    pub last_seen_at: DateTime<Utc>,
}

/// Reason an advertisement was rejected by [`decode`].
///
/// Rejections are non-fatal: the advertisement is dropped before it reaches
/// the beacon set and no state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeRejection {
    /// Payload was not exactly [`FRAME_LEN`] bytes.
    #[error("manufacturer payload is {actual} bytes, expected {FRAME_LEN}")]
    WrongLength {
        /// Length of the rejected payload.
        actual: usize,
    },

    /// Payload had the right length but the wrong type or data-length byte.
    #[error("not an iBeacon frame (type {type_byte:#04x}, length {length_byte:#04x})")]
    WrongType {
        /// Frame type byte found at offset 2.
        type_byte: u8,
        /// Data length byte found at offset 3.
        length_byte: u8,
    },
}

/// Decode a raw manufacturer payload into a [`BeaconRecord`].
///
/// `rssi` is supplied out-of-band by the radio layer for this advertisement;
/// it is not encoded in the payload itself.
///
/// # Errors
///
/// Returns [`DecodeRejection::WrongLength`] if the payload is not exactly
/// 25 bytes, and [`DecodeRejection::WrongType`] if the frame type byte is
/// not `0x02` or the data length byte is not `0x15`.
pub fn decode(payload: &[u8], rssi: i16) -> Result<BeaconRecord, DecodeRejection> {
    if payload.len() != FRAME_LEN {
        return Err(DecodeRejection::WrongLength {
            actual: payload.len(),
        });
    }
    if payload[2] != BEACON_TYPE || payload[3] != BEACON_DATA_LEN {
        return Err(DecodeRejection::WrongType {
            type_byte: payload[2],
            length_byte: payload[3],
        });
    }

    let manufacturer_id = u16::from_le_bytes([payload[0], payload[1]]);

    let mut identity = [0u8; 16];
    identity.copy_from_slice(&payload[4..20]);

    let major = u16::from_be_bytes([payload[20], payload[21]]);
    let minor = u16::from_be_bytes([payload[22], payload[23]]);
    let tx_power = i8::from_be_bytes([payload[24]]);

    Ok(BeaconRecord {
        identity: Uuid::from_bytes(identity),
        manufacturer_id,
        major,
        minor,
        tx_power,
        rssi,
        last_seen_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed 25-byte frame from its fields.
    fn frame(manufacturer_id: u16, identity: Uuid, major: u16, minor: u16, tx_power: i8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_LEN);
        buf.extend_from_slice(&manufacturer_id.to_le_bytes());
        buf.push(BEACON_TYPE);
        buf.push(BEACON_DATA_LEN);
        buf.extend_from_slice(identity.as_bytes());
        buf.extend_from_slice(&major.to_be_bytes());
        buf.extend_from_slice(&minor.to_be_bytes());
        buf.extend_from_slice(&tx_power.to_be_bytes());
        buf
    }

    #[test]
    fn rejects_short_long_and_empty_payloads() {
        for len in [0usize, 1, 24, 26, 31] {
            let payload = vec![0u8; len];
            assert_eq!(
                decode(&payload, -70),
                Err(DecodeRejection::WrongLength { actual: len }),
                "length {len} must be rejected"
            );
        }
    }

    #[test]
    fn length_is_checked_before_type() {
        // A 24-byte payload with a bad type byte still reports WrongLength.
        let mut payload = vec![0u8; 24];
        payload[2] = 0xFF;
        assert_eq!(
            decode(&payload, -70),
            Err(DecodeRejection::WrongLength { actual: 24 })
        );
    }

    #[test]
    fn rejects_wrong_type_byte() {
        let mut payload = frame(0x004C, Uuid::new_v4(), 1, 2, -59);
        payload[2] = 0x03;
        assert_eq!(
            decode(&payload, -70),
            Err(DecodeRejection::WrongType {
                type_byte: 0x03,
                length_byte: 0x15,
            })
        );
    }

    #[test]
    fn rejects_wrong_data_length_byte() {
        let mut payload = frame(0x004C, Uuid::new_v4(), 1, 2, -59);
        payload[3] = 0x14;
        assert_eq!(
            decode(&payload, -70),
            Err(DecodeRejection::WrongType {
                type_byte: 0x02,
                length_byte: 0x14,
            })
        );
    }

    #[test]
    fn round_trips_all_fields() {
        let identity = Uuid::new_v4();
        let payload = frame(0x0B1E, identity, 0xBEEF, 0x0001, -128);
        let record = decode(&payload, -42).expect("valid frame");
        assert_eq!(record.identity, identity);
        assert_eq!(record.manufacturer_id, 0x0B1E);
        assert_eq!(record.major, 0xBEEF);
        assert_eq!(record.minor, 0x0001);
        assert_eq!(record.tx_power, -128);
        assert_eq!(record.rssi, -42);
    }

    #[test]
    fn decodes_reference_apple_frame() {
        // [0x4C,0x00, 0x02,0x15, <16 bytes>, 0x00,0x01, 0x00,0x02, 0x7F] at -85 dBm.
        let identity = Uuid::parse_str("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0").unwrap();
        let mut payload = vec![0x4C, 0x00, 0x02, 0x15];
        payload.extend_from_slice(identity.as_bytes());
        payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0x7F]);

        let record = decode(&payload, -85).expect("valid frame");
        assert_eq!(record.identity, identity);
        assert_eq!(record.manufacturer_id, 0x004C);
        assert_eq!(record.major, 1);
        assert_eq!(record.minor, 2);
        assert_eq!(record.tx_power, 127);
        assert_eq!(record.rssi, -85);
    }

    #[test]
    fn tx_power_is_twos_complement() {
        let payload = frame(0x004C, Uuid::new_v4(), 0, 0, 0);
        let mut negative = payload.clone();
        negative[24] = 0xC4; // -60 dBm
        assert_eq!(decode(&negative, -50).unwrap().tx_power, -60);

        let mut positive = payload;
        positive[24] = 0x7F;
        assert_eq!(decode(&positive, -50).unwrap().tx_power, 127);
    }

    #[test]
    fn identity_bytes_are_not_swapped() {
        let raw: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        let mut payload = vec![0x4C, 0x00, 0x02, 0x15];
        payload.extend_from_slice(&raw);
        payload.extend_from_slice(&[0, 0, 0, 0, 0]);

        let record = decode(&payload, -1).unwrap();
        assert_eq!(record.identity.as_bytes(), &raw);
    }
}
