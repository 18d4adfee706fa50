//! Shared boundary types.
//!
//! These types cross the boundary to the excluded collaborators (backend
//! status client, UI). Sensor-backed fields use [`Reading`] so "sensor not
//! reporting" stays distinguishable from "sensor reports false".

use serde::{Deserialize, Serialize};

/// Tri-state sensor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Reading<T> {
    /// The sensor reported this value.
    Known(T),

    /// The sensor did not report.
    #[default]
    Unknown,

    /// The vehicle has no such sensor.
    NotApplicable,
}

impl<T> Reading<T> {
    /// The reported value, if one exists.
    pub fn known(self) -> Option<T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown | Self::NotApplicable => None,
        }
    }

    /// Whether the sensor reported a value.
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Last known status of the selected vehicle, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// Whether all doors report locked.
    pub locked: Reading<bool>,

    /// Remaining fuel, in the backend's own units.
    pub fuel_level: Reading<f32>,
}

impl VehicleStatus {
    /// Combine the four per-door lock sensors into one reading.
    ///
    /// The vehicle counts as locked only when every door reports `0`
    /// (locked); a single missing sensor makes the whole reading unknown.
    #[must_use]
    pub fn locked_from_doors(doors: [Option<i64>; 4]) -> Reading<bool> {
        let mut locked = true;
        for door in doors {
            match door {
                Some(state) => locked &= state == 0,
                None => return Reading::Unknown,
            }
        }
        Reading::Known(locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_is_distinguishable_from_unknown_false() {
        assert_eq!(Reading::Known(false).known(), Some(false));
        assert_eq!(Reading::<bool>::Unknown.known(), None);
        assert_eq!(Reading::<bool>::NotApplicable.known(), None);
        assert!(!Reading::<bool>::Unknown.is_known());
    }

    #[test]
    fn locked_requires_all_doors_reporting_zero() {
        assert_eq!(
            VehicleStatus::locked_from_doors([Some(0), Some(0), Some(0), Some(0)]),
            Reading::Known(true)
        );
        assert_eq!(
            VehicleStatus::locked_from_doors([Some(0), Some(1), Some(0), Some(0)]),
            Reading::Known(false)
        );
        assert_eq!(
            VehicleStatus::locked_from_doors([Some(0), None, Some(0), Some(0)]),
            Reading::Unknown
        );
    }

    #[test]
    fn reading_serde_round_trip() {
        let status = VehicleStatus {
            locked: Reading::Known(true),
            fuel_level: Reading::NotApplicable,
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: VehicleStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
