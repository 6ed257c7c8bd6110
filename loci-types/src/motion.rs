//! Enums and the raw location fix shared between the sampling pipeline and
//! the persisted sample record.

use crate::coordinate::Coordinate;
use serde::{Deserialize, Serialize};

/// Whether the device was moving, stationary, or the brain couldn't yet
/// tell, at the instant a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovingState {
    Moving,
    Stationary,
    Uncertain,
}

/// The recording lifecycle state of the sensor pipeline at sample time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Off,
    Recording,
    Sleeping,
    Wakeup,
}

/// Where a sample originated: live sensor capture vs. an external import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Recorded,
    Imported,
}

/// A raw (pre-Kalman) location observation as delivered by a `LocationProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub speed: f64,
    pub course: f64,
    pub altitude: f64,
    /// Seconds since the UNIX epoch; monotonic within one recording session.
    pub timestamp: f64,
}

impl LocationFix {
    /// `hasUsableCoordinate`: coordinate must be valid, non-null-island, and
    /// the fix must actually carry positive horizontal accuracy.
    pub fn has_usable_coordinate(&self) -> bool {
        self.coordinate.is_usable() && self.horizontal_accuracy > 0.0
    }
}
