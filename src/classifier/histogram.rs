//! A per-region table of label -> count built from labelled samples.
//! `classify` normalises counts to probabilities. This is the
//! `ActivityType`/geographic-histogram model of the design's dynamic-dispatch
//! note, and also what `ModelUpdater` produces as the compiled artifact for
//! a region (see the implementation note in the updater module).

use super::DiscreteClassifier;
use crate::model::GeoRect;
use crate::sample::LocomotionSample;
use loci_types::{ActivityType, ClassifierResults, Coordinate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramClassifier {
    geo_key: String,
    depth: u8,
    rect: GeoRect,
    counts: [u64; ActivityType::ALL.len()],
    total: u64,
    max_training_samples: usize,
    accuracy_score: Option<f64>,
}

impl HistogramClassifier {
    pub fn new(geo_key: String, depth: u8, rect: GeoRect, max_training_samples: usize) -> Self {
        Self {
            geo_key,
            depth,
            rect,
            counts: [0; ActivityType::ALL.len()],
            total: 0,
            max_training_samples: max_training_samples.max(1),
            accuracy_score: None,
        }
    }

    /// Train from a batch of labelled samples (those carrying
    /// `confirmed_type`). Unlabelled samples are ignored.
    pub fn train(&mut self, samples: &[LocomotionSample]) {
        for sample in samples {
            if let Some(label) = sample.confirmed_type {
                self.counts[label.index()] += 1;
                self.total += 1;
            }
        }
    }

    pub fn set_accuracy_score(&mut self, score: f64) {
        self.accuracy_score = Some(score);
    }

    pub fn total_samples(&self) -> u64 {
        self.total
    }
}

impl DiscreteClassifier for HistogramClassifier {
    fn classify(&self, _sample: &LocomotionSample, _prior: Option<&ClassifierResults>) -> ClassifierResults {
        let mut result = ClassifierResults::empty();
        if self.total == 0 {
            result.more_coming = true;
            return result;
        }
        for activity in ActivityType::ALL {
            let count = self.counts[activity.index()] as f64;
            result.set(activity, count / self.total as f64);
        }
        result.more_coming = false;
        result
    }

    fn completeness(&self) -> f64 {
        (self.total as f64 / self.max_training_samples as f64).min(1.0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use loci_types::{LocationFix, MovingState, RecordingState};

    fn labelled(label: ActivityType) -> LocomotionSample {
        let mut s = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording);
        s.confirmed_type = Some(label);
        s
    }

    #[test]
    fn normalises_counts_to_probabilities() {
        let rect = GeoRect::for_depth(Coordinate::new(35.0, 139.0), 2);
        let mut classifier = HistogramClassifier::new("CD2".into(), 2, rect, 10);
        classifier.train(&[
            labelled(ActivityType::Walking),
            labelled(ActivityType::Walking),
            labelled(ActivityType::Car),
        ]);

        let result = classifier.classify(
            &LocomotionSample::new(0.0, MovingState::Moving, RecordingState::Recording)
                .with_location(LocationFix {
                    coordinate: Coordinate::new(35.0, 139.0),
                    horizontal_accuracy: 5.0,
                    vertical_accuracy: 5.0,
                    speed: 0.0,
                    course: 0.0,
                    altitude: 0.0,
                    timestamp: 0.0,
                }),
            None,
        );

        assert!((result.get(ActivityType::Walking) - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.get(ActivityType::Car) - 1.0 / 3.0).abs() < 1e-9);
        assert!(!result.more_coming);
    }

    #[test]
    fn completeness_saturates_at_one() {
        let rect = GeoRect::for_depth(Coordinate::new(35.0, 139.0), 2);
        let mut classifier = HistogramClassifier::new("CD2".into(), 2, rect, 2);
        classifier.train(&[labelled(ActivityType::Walking), labelled(ActivityType::Walking), labelled(ActivityType::Walking)]);
        assert_eq!(classifier.completeness(), 1.0);
    }
}
