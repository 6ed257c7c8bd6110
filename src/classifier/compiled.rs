//! Wraps an opaque trained artifact (produced by `ModelUpdater`) behind the
//! `DiscreteClassifier` trait -- the `CoreMLModelWrapper` equivalent.
//! Inference is a lightweight linear-score evaluator over the declared
//! feature vector rather than a literal boosted-tree runtime, since the
//! tree-training/inference runtime itself is out of scope per the design
//! (only the contract is specified).

use super::DiscreteClassifier;
use crate::model::GeoRect;
use crate::sample::LocomotionSample;
use loci_types::{ActivityType, ClassifierResults, Coordinate, MovingState};
use serde::{Deserialize, Serialize};

/// The declared feature vector: stepHz, xy/zAcceleration, moving-state,
/// accuracies, speed, course, lat/lon, altitude, time-of-day,
/// sinceVisitStart.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub step_hz: f64,
    pub xy_acceleration: f64,
    pub z_acceleration: f64,
    pub is_moving: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub speed: f64,
    pub course: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub time_of_day_secs: f64,
    pub since_visit_start_secs: f64,
}

impl FeatureVector {
    pub fn extract(sample: &LocomotionSample, since_visit_start_secs: f64) -> Self {
        let location = sample.location.unwrap_or(loci_types::LocationFix {
            coordinate: loci_types::Coordinate::NULL_ISLAND,
            horizontal_accuracy: 0.0,
            vertical_accuracy: 0.0,
            speed: 0.0,
            course: 0.0,
            altitude: 0.0,
            timestamp: sample.timestamp,
        });
        Self {
            step_hz: sample.step_hz,
            xy_acceleration: sample.xy_acceleration,
            z_acceleration: sample.z_acceleration,
            is_moving: if matches!(sample.moving_state, MovingState::Moving) {
                1.0
            } else {
                0.0
            },
            horizontal_accuracy: location.horizontal_accuracy,
            vertical_accuracy: location.vertical_accuracy,
            speed: location.speed,
            course: location.course,
            latitude: location.coordinate.latitude,
            longitude: location.coordinate.longitude,
            altitude: location.altitude,
            time_of_day_secs: sample.timestamp.rem_euclid(86_400.0),
            since_visit_start_secs,
        }
    }

    fn as_array(&self) -> [f64; 13] {
        [
            self.step_hz,
            self.xy_acceleration,
            self.z_acceleration,
            self.is_moving,
            self.horizontal_accuracy,
            self.vertical_accuracy,
            self.speed,
            self.course,
            self.latitude,
            self.longitude,
            self.altitude,
            self.time_of_day_secs,
            self.since_visit_start_secs,
        ]
    }
}

/// One linear weight row per activity-type label, dotted with the feature
/// vector and passed through a softmax so the output behaves like a
/// probability vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModelClassifier {
    geo_key: String,
    depth: u8,
    rect: GeoRect,
    weights: Vec<[f64; 13]>,
    biases: Vec<f64>,
    total_samples: usize,
    max_training_samples: usize,
    accuracy_score: Option<f64>,
}

impl CompiledModelClassifier {
    pub fn new(
        geo_key: String,
        depth: u8,
        rect: GeoRect,
        weights: Vec<[f64; 13]>,
        biases: Vec<f64>,
        total_samples: usize,
        max_training_samples: usize,
        accuracy_score: Option<f64>,
    ) -> Self {
        assert_eq!(weights.len(), ActivityType::ALL.len());
        assert_eq!(biases.len(), ActivityType::ALL.len());
        Self {
            geo_key,
            depth,
            rect,
            weights,
            biases,
            total_samples,
            max_training_samples: max_training_samples.max(1),
            accuracy_score,
        }
    }

    fn score(&self, features: &FeatureVector) -> [f64; 20] {
        let x = features.as_array();
        let mut logits = [0.0_f64; ActivityType::ALL.len()];
        for (i, activity) in ActivityType::ALL.iter().enumerate() {
            let idx = activity.index();
            let mut s = self.biases[idx];
            for (w, v) in self.weights[idx].iter().zip(x.iter()) {
                s += w * v;
            }
            logits[i] = s;
        }
        softmax(logits)
    }
}

fn softmax(logits: [f64; ActivityType::ALL.len()]) -> [f64; ActivityType::ALL.len()] {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    let mut out = [0.0_f64; ActivityType::ALL.len()];
    if sum > 0.0 {
        for (i, e) in exps.into_iter().enumerate() {
            out[i] = e / sum;
        }
    }
    out
}

impl DiscreteClassifier for CompiledModelClassifier {
    fn classify(&self, sample: &LocomotionSample, _prior: Option<&ClassifierResults>) -> ClassifierResults {
        let features = FeatureVector::extract(sample, 0.0);
        let scores = self.score(&features);
        let mut result = ClassifierResults::empty();
        for (i, activity) in ActivityType::ALL.iter().enumerate() {
            result.set(*activity, scores[i]);
        }
        result.more_coming = self.completeness() < 1.0;
        result
    }

    fn completeness(&self) -> f64 {
        (self.total_samples as f64 / self.max_training_samples as f64).min(1.0)
    }

    fn accuracy(&self) -> Option<f64> {
        self.accuracy_score
    }

    fn contains(&self, coordinate: Coordinate) -> bool {
        self.rect.contains(coordinate)
    }

    fn geo_key(&self) -> &str {
        &self.geo_key
    }

    fn depth(&self) -> u8 {
        self.depth
    }
}
