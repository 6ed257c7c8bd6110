//! Classifier composition (C10, C11): a geographic, depth-hierarchical,
//! probabilistic classifier that assigns type probabilities to samples and
//! items. `DiscreteClassifier` is an interface with three implementors
//! (`HistogramClassifier`, `CompiledModelClassifier`, `FallbackClassifier`);
//! `CompositeClassifier` selects and weight-merges them over a coordinate,
//! per the "dynamic dispatch of classifiers" design note.

mod compiled;
mod fallback;
mod histogram;

pub use compiled::CompiledModelClassifier;
pub use fallback::FallbackClassifier;
pub use histogram::HistogramClassifier;

use crate::config::Config;
use crate::item::TimelineItem;
use crate::sample::LocomotionSample;
use loci_types::{ActivityType, ClassifierResults, Coordinate};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One region/depth model: scores a sample across the supported type
/// labels. Implemented by `HistogramClassifier`, `CompiledModelClassifier`,
/// and `FallbackClassifier`; `CompositeClassifier` treats all three
/// uniformly through this trait.
pub trait DiscreteClassifier: Send + Sync {
    fn classify(&self, sample: &LocomotionSample, prior: Option<&ClassifierResults>) -> ClassifierResults;

    /// Training-coverage in `[0, 1]`; used as this model's weight during
    /// composition.
    fn completeness(&self) -> f64;

    fn accuracy(&self) -> Option<f64>;

    fn contains(&self, coordinate: Coordinate) -> bool;

    fn geo_key(&self) -> &str;

    fn depth(&self) -> u8;
}

/// External collaborator: supplies the most geographically specific model
/// available at a depth, whether compiled-in or fetched remotely.
pub trait ModelProvider: Send + Sync {
    fn fetch_model(&self, depth: u8, coordinate: Coordinate) -> Option<Arc<dyn DiscreteClassifier>>;
}

/// The priority ladder: `CD2 > CD1 > CD0 > BD0`. Depths 2/1/0 are
/// per-coordinate models of decreasing geographic specificity; `BD0` is the
/// bundled fallback, always present, always `completeness == 1.0`.
const DEPTHS: [u8; 3] = [2, 1, 0];

pub struct CompositeClassifier {
    slots: [Option<Arc<dyn DiscreteClassifier>>; 3],
    fallback: Arc<dyn DiscreteClassifier>,
}

impl CompositeClassifier {
    pub fn new(fallback: Arc<dyn DiscreteClassifier>) -> Self {
        Self {
            slots: [None, None, None],
            fallback,
        }
    }

    /// Lazily refresh the slot set: for each priority slot lacking a
    /// classifier, or whose classifier no longer contains the coordinate,
    /// request a replacement from the model provider.
    fn refresh_slots(&mut self, coordinate: Coordinate, provider: &dyn ModelProvider) {
        for (idx, depth) in DEPTHS.iter().enumerate() {
            let needs_refresh = match &self.slots[idx] {
                Some(classifier) => !classifier.contains(coordinate),
                None => true,
            };
            if needs_refresh {
                self.slots[idx] = provider.fetch_model(*depth, coordinate);
            }
        }
    }

    fn priority_order(&self) -> Vec<&Arc<dyn DiscreteClassifier>> {
        let mut ordered: Vec<&Arc<dyn DiscreteClassifier>> =
            self.slots.iter().filter_map(|s| s.as_ref()).collect();
        ordered.push(&self.fallback);
        ordered
    }

    /// Classify one sample, refreshing the slot set first if it carries a
    /// usable coordinate.
    pub fn classify(
        &mut self,
        sample: &LocomotionSample,
        prior: Option<&ClassifierResults>,
        provider: &dyn ModelProvider,
    ) -> ClassifierResults {
        if let Some(coord) = sample.coordinate() {
            self.refresh_slots(coord, provider);
        }
        self.merge(sample, prior)
    }

    fn merge(&self, sample: &LocomotionSample, prior: Option<&ClassifierResults>) -> ClassifierResults {
        let classifiers = self.priority_order();
        let n = classifiers.len();
        let mut merged = ClassifierResults::empty();
        let mut remaining = 1.0_f64;
        let mut more_coming = true;

        for (i, classifier) in classifiers.iter().enumerate() {
            if remaining <= 0.0 {
                break;
            }
            let is_last = i == n - 1;
            let completeness = if is_last { 1.0 } else { classifier.completeness() };
            let weight = remaining * completeness;
            let result = classifier.classify(sample, prior);
            for activity in ActivityType::ALL {
                let current = merged.get(activity);
                merged.set(activity, current + weight * result.get(activity));
            }
            remaining -= weight;
            if completeness >= 1.0 {
                more_coming = false;
            }
        }

        merged.more_coming = more_coming;
        merged
    }

    /// Classify a sequence of samples, reusing each result as the next
    /// call's prior for temporal smoothing, then return the element-wise
    /// mean across the sequence. `timeout` bounds wall-clock time; on
    /// expiry the partial mean is returned with `more_coming = true`.
    pub fn classify_sequence(
        &mut self,
        samples: &[LocomotionSample],
        provider: &dyn ModelProvider,
        timeout: Option<Duration>,
    ) -> ClassifierResults {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut results = Vec::with_capacity(samples.len());
        let mut prior: Option<ClassifierResults> = None;
        let mut timed_out = false;

        for sample in samples {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    timed_out = true;
                    break;
                }
            }
            let result = self.classify(sample, prior.as_ref(), provider);
            prior = Some(result.clone());
            results.push(result);
        }

        let mut mean = ClassifierResults::mean(results.iter());
        if timed_out {
            mean.more_coming = true;
        }
        mean
    }

    /// Classify an item's samples and apply the radius rule: when the
    /// item's `radius3sd` exceeds `visit.maxRadius`, zero the stationary
    /// score before returning.
    pub fn classify_item(
        &mut self,
        item: &TimelineItem,
        provider: &dyn ModelProvider,
        config: &Config,
    ) -> ClassifierResults {
        let mut result = self.classify_sequence(item.samples(), provider, None);
        if item.radius().sd3() > config.visit.max_radius {
            result.set(ActivityType::Stationary, 0.0);
        }
        result
    }
}
