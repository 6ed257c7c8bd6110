//! Geometry helpers shared by the timeline, merge engine, and classifiers:
//! great-circle distance, weighted centroid, and radius-of-dispersion, all
//! grounded on the `geo` crate's `Haversine` trait.

use geo::{Distance, Haversine};
use loci_types::{Coordinate, RadiusStats};

/// Great-circle distance between two coordinates, in metres.
pub fn distance_between(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(a.as_point(), b.as_point())
}

/// The weighted centroid of a set of coordinates on the unit sphere: convert
/// to 3-D unit vectors, average, renormalise, and project back to lat/lon.
/// This avoids the antimeridian/pole wraparound bugs of averaging raw
/// lat/lon pairs directly. `None` for an empty input.
pub fn weighted_center<'a, I>(points: I) -> Option<Coordinate>
where
    I: IntoIterator<Item = (Coordinate, f64)>,
{
    let mut x = 0.0_f64;
    let mut y = 0.0_f64;
    let mut z = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for (coord, weight) in points {
        if weight <= 0.0 || !coord.is_usable() {
            continue;
        }
        let lat = coord.latitude.to_radians();
        let lon = coord.longitude.to_radians();
        x += weight * lat.cos() * lon.cos();
        y += weight * lat.cos() * lon.sin();
        z += weight * lat.sin();
        weight_sum += weight;
    }

    if weight_sum <= 0.0 {
        return None;
    }

    x /= weight_sum;
    y /= weight_sum;
    z /= weight_sum;

    let hyp = (x * x + y * y).sqrt();
    let lat = z.atan2(hyp);
    let lon = y.atan2(x);

    Some(Coordinate::new(lat.to_degrees(), lon.to_degrees()))
}

/// Unweighted centroid -- a convenience wrapper used when every sample
/// should count equally.
pub fn center<'a, I>(points: I) -> Option<Coordinate>
where
    I: IntoIterator<Item = Coordinate>,
{
    weighted_center(points.into_iter().map(|c| (c, 1.0)))
}

/// Mean and standard deviation of great-circle distance from `center`.
pub fn radius_of(center: Coordinate, points: &[Coordinate]) -> RadiusStats {
    if points.is_empty() {
        return RadiusStats::ZERO;
    }
    let distances: Vec<f64> = points.iter().map(|p| distance_between(center, *p)).collect();
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    let variance =
        distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / distances.len() as f64;
    RadiusStats::new(mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_same_point_is_zero() {
        let a = Coordinate::new(35.68, 139.76);
        assert!(distance_between(a, a) < 1e-6);
    }

    #[test]
    fn center_of_empty_input_is_none() {
        assert!(center(Vec::<Coordinate>::new()).is_none());
    }

    #[test]
    fn center_is_idempotent() {
        let points = vec![
            Coordinate::new(35.6800, 139.7600),
            Coordinate::new(35.6801, 139.7601),
            Coordinate::new(35.6799, 139.7599),
        ];
        let c1 = center(points.clone()).unwrap();
        let c2 = center(points).unwrap();
        assert!((c1.latitude - c2.latitude).abs() < 1e-12);
        assert!((c1.longitude - c2.longitude).abs() < 1e-12);
    }

    #[test]
    fn radius_of_tight_cluster_is_small() {
        let c = Coordinate::new(35.68, 139.76);
        let points = vec![c, c, c];
        let r = radius_of(c, &points);
        assert!(r.mean < 1e-6 && r.sd < 1e-6);
    }
}
