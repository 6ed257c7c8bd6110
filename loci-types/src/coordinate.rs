//! Canonical geometric value types: a lat/lon coordinate and radius statistics.

use geo::Point;
use serde::{Deserialize, Serialize};

/// The crate's canonical point type. Wraps `geo::Point<f64>` so callers don't
/// need to reach for the `geo` crate directly for the common case, while
/// still interoperating with it (`From`/`Into`) for anything that does.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const NULL_ISLAND: Coordinate = Coordinate {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// A coordinate is usable when it is finite, in-range, and not sitting
    /// exactly on null island (0, 0) -- the canonical "no fix" sentinel.
    pub fn is_usable(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && *self != Self::NULL_ISLAND
    }

    pub fn as_point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

impl From<Point<f64>> for Coordinate {
    fn from(p: Point<f64>) -> Self {
        Self {
            latitude: p.y(),
            longitude: p.x(),
        }
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(c: Coordinate) -> Self {
        c.as_point()
    }
}

/// Dispersion of a set of samples around a center: mean radius and standard
/// deviation, both in metres. Used for a visit's physical footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusStats {
    pub mean: f64,
    pub sd: f64,
}

impl RadiusStats {
    pub const ZERO: RadiusStats = RadiusStats { mean: 0.0, sd: 0.0 };

    pub fn new(mean: f64, sd: f64) -> Self {
        Self { mean, sd }
    }

    /// mean + 2*sd, the radius used by the moving-state decision.
    pub fn sd2(&self) -> f64 {
        self.mean + 2.0 * self.sd
    }

    /// mean + 3*sd, the radius used by the classifier's stationary-zeroing rule.
    pub fn sd3(&self) -> f64 {
        self.mean + 3.0 * self.sd
    }

    pub fn clamp(&self, min: f64, max: f64) -> RadiusStats {
        RadiusStats {
            mean: self.mean.clamp(min, max),
            sd: self.sd.max(0.0),
        }
    }
}
