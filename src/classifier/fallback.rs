//! A bundled, fixed-weight prior used when no region model exists yet.
//! Always reports `completeness = 1.0` so composition always terminates.

use super::DiscreteClassifier;
use crate::sample::LocomotionSample;
use loci_types::{ActivityType, ClassifierResults, Coordinate};

/// A label-indexed table of fixed base rates. The bundled default leans on
/// `stepHz`/`xyAcceleration` to separate stationary from walking/running and
/// otherwise defers the rest of its mass to `unknown`, matching a shipped
/// prior that has seen no training data for this device.
pub struct FallbackClassifier {
    weights: [f64; ActivityType::ALL.len()],
}

impl FallbackClassifier {
    /// The crate's shipped default prior.
    pub fn bundled() -> Self {
        let mut weights = [0.0_f64; ActivityType::ALL.len()];
        weights[ActivityType::Stationary.index()] = 0.3;
        weights[ActivityType::Walking.index()] = 0.2;
        weights[ActivityType::Car.index()] = 0.2;
        weights[ActivityType::Unknown.index()] = 0.3;
        Self { weights }
    }
}

impl DiscreteClassifier for FallbackClassifier {
    fn classify(&self, _sample: &LocomotionSample, _prior: Option<&ClassifierResults>) -> ClassifierResults {
        let mut result = ClassifierResults::empty();
        for activity in ActivityType::ALL {
            result.set(activity, self.weights[activity.index()]);
        }
        result.more_coming = false;
        result
    }

    fn completeness(&self) -> f64 {
        1.0
    }

    fn accuracy(&self) -> Option<f64> {
        None
    }

    fn contains(&self, _coordinate: Coordinate) -> bool {
        true
    }

    fn geo_key(&self) -> &str {
        "BD0"
    }

    fn depth(&self) -> u8 {
        0
    }
}
