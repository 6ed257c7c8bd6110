//! `TimelineItem` (C5): a Visit or Path aggregating a contiguous run of
//! samples. Modelled as a tagged variant with a shared data block, per the
//! design's "Inheritance" note -- behaviours that were virtual dispatch on
//! `kind` instead of a trait object.

use crate::config::Config;
use crate::sample::LocomotionSample;
use crate::spatial;
use loci_types::{ActivityType, ClassifierResults, Coordinate, ItemId, RadiusStats, SampleId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Visit,
    Path,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: ItemId,
    pub kind: ItemKind,
    /// Kept sorted ascending by timestamp; this is an invariant every
    /// mutator re-establishes before returning.
    samples: Vec<LocomotionSample>,
    pub previous_item_id: Option<ItemId>,
    pub next_item_id: Option<ItemId>,
    pub deleted: bool,
    pub is_merge_locked: bool,
    pub last_saved: Option<f64>,
    pub last_modified: f64,

    center: Option<Coordinate>,
    radius: RadiusStats,
    altitude: f64,
    /// Cumulative great-circle distance along consecutive samples. Zero for
    /// Visits.
    distance: f64,
    classifier_results: Option<ClassifierResults>,
}

impl TimelineItem {
    /// Create a new item seeded with one sample.
    pub fn new(kind: ItemKind, seed: LocomotionSample, config: &Config) -> Self {
        let mut item = Self {
            id: ItemId::new(),
            kind,
            samples: Vec::new(),
            previous_item_id: None,
            next_item_id: None,
            deleted: false,
            is_merge_locked: false,
            last_saved: None,
            last_modified: seed.timestamp,
            center: None,
            radius: RadiusStats::ZERO,
            altitude: 0.0,
            distance: 0.0,
            classifier_results: None,
        };
        item.append(seed, config);
        item
    }

    pub fn samples(&self) -> &[LocomotionSample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// `dateRange`: `[min sample.date, max sample.date]`. `None` when empty.
    pub fn date_range(&self) -> Option<(f64, f64)> {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    pub fn start(&self) -> Option<f64> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn end(&self) -> Option<f64> {
        self.samples.last().map(|s| s.timestamp)
    }

    pub fn duration(&self) -> f64 {
        match self.date_range() {
            Some((start, end)) => end - start,
            None => 0.0,
        }
    }

    pub fn center(&self) -> Option<Coordinate> {
        self.center
    }

    pub fn radius(&self) -> RadiusStats {
        self.radius
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn classifier_results(&self) -> Option<&ClassifierResults> {
        self.classifier_results.as_ref()
    }

    pub fn set_classifier_results(&mut self, results: ClassifierResults) {
        self.classifier_results = Some(results);
    }

    /// Metres per second, used by `maximumMergeableDistance` for paths.
    pub fn mps(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            0.0
        } else {
            self.distance / duration
        }
    }

    /// Whether this item's kind accepts a sample with the given moving
    /// state: Path accepts `moving`/`uncertain`, Visit accepts `stationary`.
    pub fn accepts(&self, moving_state: loci_types::MovingState) -> bool {
        use loci_types::MovingState::*;
        match self.kind {
            ItemKind::Path => matches!(moving_state, Moving | Uncertain),
            ItemKind::Visit => matches!(moving_state, Stationary),
        }
    }

    /// Insert a sample in timestamp order, attach it to this item, and
    /// recompute cached statistics.
    pub fn append(&mut self, mut sample: LocomotionSample, config: &Config) {
        sample.attach_to(self.id);
        let pos = self
            .samples
            .partition_point(|s| s.timestamp <= sample.timestamp);
        self.last_modified = self.last_modified.max(sample.timestamp);
        self.samples.insert(pos, sample);
        self.recompute_stats(config);
    }

    /// Remove a sample by id (used when the merge engine re-parents it
    /// elsewhere, or the processor steals it into another item).
    pub fn remove(&mut self, sample_id: SampleId, config: &Config) -> Option<LocomotionSample> {
        let pos = self.samples.iter().position(|s| s.id == sample_id)?;
        let sample = self.samples.remove(pos);
        self.recompute_stats(config);
        Some(sample)
    }

    /// Drain every sample out of this item (used when a merge deadman is
    /// fully consumed, or an extraction steals an item's whole span).
    pub fn drain_samples(&mut self, config: &Config) -> Vec<LocomotionSample> {
        let samples = std::mem::take(&mut self.samples);
        self.recompute_stats(config);
        samples
    }

    /// Re-parent a batch of foreign samples into this item in one pass,
    /// re-sorting once rather than per-insert.
    pub fn absorb(&mut self, mut foreign: Vec<LocomotionSample>, config: &Config) {
        for sample in &mut foreign {
            sample.attach_to(self.id);
        }
        self.samples.append(&mut foreign);
        self.samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.recompute_stats(config);
    }

    fn recompute_stats(&mut self, config: &Config) {
        let coordinates: Vec<Coordinate> = self
            .samples
            .iter()
            .filter(|s| !s.deleted)
            .filter_map(|s| s.coordinate())
            .collect();

        self.center = spatial::center(coordinates.iter().copied());
        self.radius = match self.center {
            Some(c) => spatial::radius_of(c, &coordinates).clamp(config.visit.min_radius, config.visit.max_radius),
            None => RadiusStats::ZERO,
        };

        let altitudes: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|s| s.location.map(|l| l.altitude))
            .collect();
        self.altitude = if altitudes.is_empty() {
            0.0
        } else {
            altitudes.iter().sum::<f64>() / altitudes.len() as f64
        };

        self.distance = match self.kind {
            ItemKind::Visit => 0.0,
            ItemKind::Path => {
                let usable: Vec<Coordinate> = self
                    .samples
                    .iter()
                    .filter_map(|s| s.coordinate())
                    .collect();
                usable
                    .windows(2)
                    .map(|pair| spatial::distance_between(pair[0], pair[1]))
                    .sum()
            }
        };
    }

    /// `isValid`: the minimum bar for an item to exist in the timeline at
    /// all, dispatched on `kind`.
    pub fn is_valid(&self, config: &Config) -> bool {
        match self.kind {
            ItemKind::Visit => !self.samples.is_empty() && self.duration() >= config.visit.min_valid_duration_secs,
            ItemKind::Path => {
                self.samples.len() >= 2
                    && self.duration() >= config.path.min_valid_duration_secs
                    && self.distance >= config.path.min_valid_distance
            }
        }
    }

    /// `isWorthKeeping`: valid plus the stronger duration/distance bar that
    /// marks a "keeper" item, surviving merges against other keepers.
    pub fn is_worth_keeping(&self, config: &Config) -> bool {
        if !self.is_valid(config) {
            return false;
        }
        match self.kind {
            ItemKind::Visit => self.duration() >= config.visit.min_keeper_duration_secs,
            ItemKind::Path => {
                self.duration() >= config.path.min_keeper_duration_secs
                    && self.distance >= config.path.min_keeper_distance
            }
        }
    }

    /// A coarse rank used to compare "keepness" between neighbours when the
    /// merge engine looks for a betweener merge: invalid < valid < keeper.
    pub fn keepness(&self, config: &Config) -> u8 {
        if self.is_worth_keeping(config) {
            2
        } else if self.is_valid(config) {
            1
        } else {
            0
        }
    }

    /// The dominant/mode activity type across this item's samples, falling
    /// back to the cached classifier result's best label.
    pub fn dominant_type(&self) -> ActivityType {
        if let Some(results) = &self.classifier_results {
            return results.best().0;
        }
        let mut counts = std::collections::HashMap::new();
        for sample in &self.samples {
            *counts.entry(sample.best_effort_type()).or_insert(0usize) += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(activity, _)| activity)
            .unwrap_or(ActivityType::Unknown)
    }

    /// The "moving type" used by Path-Path merge scoring: the dominant
    /// moving activity type (falling back to the overall dominant type when
    /// no explicitly-moving label is present).
    pub fn moving_type(&self) -> Option<ActivityType> {
        if let Some(results) = &self.classifier_results {
            let (best, score) = results.best();
            if score > 0.0 && best.is_moving() {
                return Some(best);
            }
        }
        let dominant = self.dominant_type();
        if dominant.is_moving() {
            Some(dominant)
        } else {
            None
        }
    }

    pub fn soft_delete(&mut self) {
        self.deleted = true;
        self.previous_item_id = None;
        self.next_item_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loci_types::{LocationFix, MovingState, RecordingState};

    fn fixed_sample(t: f64, lat: f64, lon: f64, state: MovingState) -> LocomotionSample {
        LocomotionSample::new(t, state, RecordingState::Recording).with_location(LocationFix {
            coordinate: Coordinate::new(lat, lon),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 1.0,
            timestamp: t,
        })
    }

    #[test]
    fn create_then_keep_a_visit() {
        let config = Config::default();
        let mut item = TimelineItem::new(
            ItemKind::Visit,
            fixed_sample(0.0, 35.68, 139.76, MovingState::Stationary),
            &config,
        );
        for t in 1..130 {
            item.append(
                fixed_sample(t as f64, 35.68, 139.76, MovingState::Stationary),
                &config,
            );
        }

        assert_eq!(item.kind, ItemKind::Visit);
        assert!((item.duration() - 129.0).abs() < 1e-9);
        assert!(item.is_worth_keeping(&config));
        assert!(item.radius().mean <= 5.0);
    }

    #[test]
    fn path_distance_accumulates_along_samples() {
        let config = Config::default();
        let mut item = TimelineItem::new(
            ItemKind::Path,
            fixed_sample(0.0, 35.0, 139.0, MovingState::Moving),
            &config,
        );
        // ~0.0054 degrees longitude at the equator-ish latitude is roughly
        // 500m per step; exact value doesn't matter, just that it accumulates.
        item.append(fixed_sample(10.0, 35.0, 139.005, MovingState::Moving), &config);
        item.append(fixed_sample(20.0, 35.0, 139.010, MovingState::Moving), &config);

        assert!(item.distance() > 0.0);
        assert_eq!(item.sample_count(), 3);
    }

    #[test]
    fn samples_stay_sorted_regardless_of_insertion_order() {
        let config = Config::default();
        let mut item = TimelineItem::new(
            ItemKind::Visit,
            fixed_sample(10.0, 35.0, 139.0, MovingState::Stationary),
            &config,
        );
        item.append(fixed_sample(5.0, 35.0, 139.0, MovingState::Stationary), &config);
        item.append(fixed_sample(20.0, 35.0, 139.0, MovingState::Stationary), &config);

        let timestamps: Vec<f64> = item.samples().iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![5.0, 10.0, 20.0]);
    }

    #[test]
    fn empty_path_is_not_valid() {
        let config = Config::default();
        let item = TimelineItem::new(
            ItemKind::Path,
            fixed_sample(0.0, 35.0, 139.0, MovingState::Moving),
            &config,
        );
        assert!(!item.is_valid(&config));
    }
}
