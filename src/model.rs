//! Metadata for a region/depth classifier model (C10's persisted record).
//! The model's own scoring logic lives in `classifier`; this module is the
//! bookkeeping the store and `ModelUpdater` operate on.

use loci_types::{Coordinate, ModelId};
use serde::{Deserialize, Serialize};

/// A rectangular lat-lon patch binding a model to a location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRect {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl GeoRect {
    /// Build the rect at `depth` that contains `coordinate`. Depth 2 is the
    /// finest (neighbourhood), depth 0 the coarsest (global-ish); each
    /// depth's cell size is a power-of-ten fraction of a degree.
    pub fn for_depth(coordinate: Coordinate, depth: u8) -> Self {
        let cell_size = match depth {
            2 => 0.01,
            1 => 0.1,
            _ => 1.0,
        };
        let lat_min = (coordinate.latitude / cell_size).floor() * cell_size;
        let lon_min = (coordinate.longitude / cell_size).floor() * cell_size;
        Self {
            lat_min,
            lat_max: lat_min + cell_size,
            lon_min,
            lon_max: lon_min + cell_size,
        }
    }

    /// A model contains a coordinate iff the coordinate falls in its range
    /// and is not at null island.
    pub fn contains(&self, coordinate: Coordinate) -> bool {
        coordinate.is_usable()
            && coordinate.latitude >= self.lat_min
            && coordinate.latitude < self.lat_max
            && coordinate.longitude >= self.lon_min
            && coordinate.longitude < self.lon_max
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }
}

/// `id` is rendered as `"CD<depth> <lat>,<lon>"` e.g. `"CD2 35.60,139.70"`.
pub fn geo_key(depth: u8, rect: &GeoRect) -> String {
    let center = rect.center();
    format!("CD{depth} {:.2},{:.2}", center.latitude, center.longitude)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModelMeta {
    pub id: ModelId,
    pub geo_key: String,
    pub depth: u8,
    pub rect: GeoRect,
    pub total_samples: usize,
    pub accuracy_score: Option<f64>,
    pub last_updated: f64,
    pub needs_update: bool,
}

impl ClassifierModelMeta {
    pub fn new(depth: u8, rect: GeoRect, now: f64) -> Self {
        Self {
            id: ModelId::new(),
            geo_key: geo_key(depth, &rect),
            depth,
            rect,
            total_samples: 0,
            accuracy_score: None,
            last_updated: now,
            needs_update: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_contains_its_own_center() {
        let coord = Coordinate::new(35.604, 139.702);
        let rect = GeoRect::for_depth(coord, 2);
        assert!(rect.contains(coord));
        assert!(!rect.contains(Coordinate::NULL_ISLAND));
    }

    #[test]
    fn geo_key_rounds_to_two_decimals() {
        let coord = Coordinate::new(35.604, 139.702);
        let rect = GeoRect::for_depth(coord, 2);
        assert!(geo_key(2, &rect).starts_with("CD2 "));
    }
}
