//! `ModelUpdater` (C12): tracks which geographic regions need a retrained
//! classifier after a confirmed-type sample lands, and trains/publishes the
//! replacement. The "boosted-tree classifier" the design describes is
//! realized here as a `HistogramClassifier` built over the region's recently
//! confirmed samples -- an opaque, versioned, atomically-swapped artifact
//! keyed by `geoKey`, without pulling in a gradient-boosting runtime.

use crate::classifier::{DiscreteClassifier, HistogramClassifier, ModelProvider};
use crate::config::Config;
use crate::error::Result;
use crate::model::{geo_key, ClassifierModelMeta, GeoRect};
use crate::sample::LocomotionSample;
use crate::storage::StorageBackend;
use crate::store::TimelineStore;
use loci_types::Coordinate;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const DEPTHS: [u8; 3] = [0, 1, 2];

pub struct ModelUpdater {
    config: Config,
    models: RwLock<HashMap<String, Arc<dyn DiscreteClassifier>>>,
    meta: RwLock<HashMap<String, ClassifierModelMeta>>,
    pending: Mutex<HashSet<String>>,
}

impl ModelUpdater {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            models: RwLock::new(HashMap::new()),
            meta: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn meta_for(&self, geo_key: &str) -> Option<ClassifierModelMeta> {
        self.meta.read().get(geo_key).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Called when a sample carrying a `confirmedType` enters an item: marks
    /// every enclosing (CD0, CD1, CD2) region `needsUpdate`.
    pub fn on_confirmed_sample(&self, sample: &LocomotionSample, now: f64) {
        if sample.confirmed_type.is_none() {
            return;
        }
        let Some(coordinate) = sample.coordinate() else { return };

        for depth in DEPTHS {
            let rect = GeoRect::for_depth(coordinate, depth);
            let key = geo_key(depth, &rect);
            let mut meta_map = self.meta.write();
            let entry = meta_map.entry(key.clone()).or_insert_with(|| ClassifierModelMeta::new(depth, rect, now));
            entry.needs_update = true;
            drop(meta_map);
            self.pending.lock().unwrap().insert(key);
        }
    }

    /// Train and publish one pending model, chosen arbitrarily from the
    /// pending set. Returns `false` when there was nothing pending, or the
    /// candidate had fewer than 2 distinct confirmed labels (left pending
    /// for the next confirmed sample to retry with more data).
    pub fn train_one_pending<B: StorageBackend>(&self, store: &TimelineStore<B>, now: f64) -> Result<bool> {
        let Some(geo_key) = self.pop_one_pending() else {
            return Ok(false);
        };
        let Some(meta) = self.meta_for(&geo_key) else {
            return Ok(false);
        };

        let cap = self.config.model.max_training_samples_for_depth(meta.depth);
        let mut samples = store.find_samples(|s| {
            !s.deleted
                && s.confirmed_type.is_some()
                && s.coordinate().is_some_and(|c| meta.rect.contains(c))
        });
        samples.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        samples.truncate(cap);

        let distinct_labels: HashSet<_> = samples.iter().filter_map(|s| s.confirmed_type).collect();
        if distinct_labels.len() < 2 {
            tracing::debug!(geo_key, labels = distinct_labels.len(), "skipping training, needs_update stays set");
            return Ok(false);
        }

        let mut classifier = HistogramClassifier::new(geo_key.clone(), meta.depth, meta.rect, cap);
        classifier.train(&samples);

        let correct = samples
            .iter()
            .filter(|s| {
                let predicted = classifier.classify(s, None).best().0;
                Some(predicted) == s.confirmed_type
            })
            .count();
        let accuracy = correct as f64 / samples.len() as f64;
        classifier.set_accuracy_score(accuracy);

        tracing::info!(geo_key, samples = samples.len(), accuracy, "trained and published region model");
        self.models.write().insert(geo_key.clone(), Arc::new(classifier));

        let mut meta_map = self.meta.write();
        if let Some(entry) = meta_map.get_mut(&geo_key) {
            entry.total_samples = samples.len();
            entry.accuracy_score = Some(accuracy);
            entry.last_updated = now;
            entry.needs_update = false;
        }
        Ok(true)
    }

    fn pop_one_pending(&self) -> Option<String> {
        let mut pending = self.pending.lock().unwrap();
        let key = pending.iter().next().cloned()?;
        pending.remove(&key);
        Some(key)
    }
}

impl ModelProvider for ModelUpdater {
    fn fetch_model(&self, depth: u8, coordinate: Coordinate) -> Option<Arc<dyn DiscreteClassifier>> {
        let rect = GeoRect::for_depth(coordinate, depth);
        let key = geo_key(depth, &rect);
        self.models.read().get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::MemoryBackend;
    use loci_types::{ActivityType, LocationFix, MovingState, RecordingState};
    use std::sync::Arc as StdArc;

    fn store() -> TimelineStore<MemoryBackend> {
        TimelineStore::open(MemoryBackend::new(), Default::default(), StdArc::new(EventBus::new())).unwrap()
    }

    fn confirmed_sample(t: f64, label: ActivityType) -> LocomotionSample {
        let mut s = LocomotionSample::new(t, MovingState::Stationary, RecordingState::Recording).with_location(LocationFix {
            coordinate: Coordinate::new(35.68, 139.76),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 0.0,
            timestamp: t,
        });
        s.confirmed_type = Some(label);
        s
    }

    #[test]
    fn skips_training_with_fewer_than_two_distinct_labels() {
        let store = store();
        let updater = ModelUpdater::new(Config::default());
        let sample = confirmed_sample(0.0, ActivityType::Walking);
        updater.on_confirmed_sample(&sample, 0.0);
        store.save_sample(sample, true).unwrap();

        assert!(!updater.train_one_pending(&store, 10.0).unwrap());
    }

    #[test]
    fn trains_and_publishes_once_two_labels_are_present() {
        let store = store();
        let updater = ModelUpdater::new(Config::default());

        let walking = confirmed_sample(0.0, ActivityType::Walking);
        let car = confirmed_sample(1.0, ActivityType::Car);
        updater.on_confirmed_sample(&walking, 0.0);
        updater.on_confirmed_sample(&car, 1.0);
        store.save_sample(walking, true).unwrap();
        store.save_sample(car, true).unwrap();

        while updater.pending_count() > 0 {
            updater.train_one_pending(&store, 10.0).unwrap();
        }
        assert!(updater.fetch_model(2, Coordinate::new(35.68, 139.76)).is_some());
    }
}
