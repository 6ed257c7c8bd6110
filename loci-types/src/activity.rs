//! The closed activity-type label set and the probability vector classifiers
//! produce over it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A closed, exhaustive set of activity-type labels. New transport modes are
/// not expected to be added at runtime -- the whole classifier pipeline
/// (histograms, compiled models, merge weighting) is indexed by this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    Stationary,
    Walking,
    Running,
    Cycling,
    Car,
    Bus,
    Train,
    Airplane,
    Boat,
    Motorcycle,
    Tram,
    Subway,
    Ferry,
    Scooter,
    Skateboarding,
    Wheelchair,
    Golf,
    ManualWorkout,
    StationaryWorkout,
    Unknown,
}

impl ActivityType {
    pub const ALL: [ActivityType; 20] = [
        ActivityType::Stationary,
        ActivityType::Walking,
        ActivityType::Running,
        ActivityType::Cycling,
        ActivityType::Car,
        ActivityType::Bus,
        ActivityType::Train,
        ActivityType::Airplane,
        ActivityType::Boat,
        ActivityType::Motorcycle,
        ActivityType::Tram,
        ActivityType::Subway,
        ActivityType::Ferry,
        ActivityType::Scooter,
        ActivityType::Skateboarding,
        ActivityType::Wheelchair,
        ActivityType::Golf,
        ActivityType::ManualWorkout,
        ActivityType::StationaryWorkout,
        ActivityType::Unknown,
    ];

    /// Index into the fixed-size score table used by `ClassifierResults`.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|a| a == self).expect("exhaustive")
    }

    pub fn from_index(idx: usize) -> Option<ActivityType> {
        Self::ALL.get(idx).copied()
    }

    /// Whether this label describes being in motion (as opposed to stationary
    /// or unknown); used by the timeline recorder's moving-state gating.
    pub fn is_moving(&self) -> bool {
        !matches!(
            self,
            ActivityType::Stationary | ActivityType::StationaryWorkout | ActivityType::Unknown
        )
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityType::Stationary => "stationary",
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::Car => "car",
            ActivityType::Bus => "bus",
            ActivityType::Train => "train",
            ActivityType::Airplane => "airplane",
            ActivityType::Boat => "boat",
            ActivityType::Motorcycle => "motorcycle",
            ActivityType::Tram => "tram",
            ActivityType::Subway => "subway",
            ActivityType::Ferry => "ferry",
            ActivityType::Scooter => "scooter",
            ActivityType::Skateboarding => "skateboarding",
            ActivityType::Wheelchair => "wheelchair",
            ActivityType::Golf => "golf",
            ActivityType::ManualWorkout => "manualWorkout",
            ActivityType::StationaryWorkout => "stationaryWorkout",
            ActivityType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|a| a.to_string().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unrecognised activity type: {s}"))
    }
}

/// A probability vector over `ActivityType`, as produced by a single
/// classifier or by composing several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResults {
    scores: [f64; ActivityType::ALL.len()],
    /// True while a higher-priority, more specific classifier has not yet
    /// contributed a fully-complete (`completeness == 1.0`) result.
    pub more_coming: bool,
}

impl ClassifierResults {
    pub fn empty() -> Self {
        Self {
            scores: [0.0; ActivityType::ALL.len()],
            more_coming: true,
        }
    }

    pub fn single(activity: ActivityType, score: f64, more_coming: bool) -> Self {
        let mut results = Self::empty();
        results.set(activity, score);
        results.more_coming = more_coming;
        results
    }

    pub fn get(&self, activity: ActivityType) -> f64 {
        self.scores[activity.index()]
    }

    pub fn set(&mut self, activity: ActivityType, score: f64) {
        self.scores[activity.index()] = score;
    }

    pub fn scores(&self) -> &[f64; ActivityType::ALL.len()] {
        &self.scores
    }

    /// The highest-scoring label and its score. An all-zero vector reports
    /// `Unknown` at score 0.
    pub fn best(&self) -> (ActivityType, f64) {
        let mut best_idx = ActivityType::Unknown.index();
        let mut best_score = self.scores[best_idx];
        for (idx, &score) in self.scores.iter().enumerate() {
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        (
            ActivityType::from_index(best_idx).expect("valid index"),
            best_score,
        )
    }

    /// Combine `self` (the higher-priority result) with `other` using
    /// `self_weight` for self and `1 - self_weight` for `other`. Used by
    /// `CompositeClassifier` to fold classifiers top-priority-first.
    pub fn merge_weighted(&self, other: &ClassifierResults, self_weight: f64) -> ClassifierResults {
        let w = self_weight.clamp(0.0, 1.0);
        let mut merged = ClassifierResults::empty();
        for i in 0..self.scores.len() {
            merged.scores[i] = self.scores[i] * w + other.scores[i] * (1.0 - w);
        }
        merged.more_coming = self.more_coming && other.more_coming;
        merged
    }

    /// Element-wise arithmetic mean across a sequence of results, as used
    /// when classifying a run of samples that make up an item.
    pub fn mean<'a, I: IntoIterator<Item = &'a ClassifierResults>>(results: I) -> ClassifierResults {
        let mut sum = [0.0_f64; ActivityType::ALL.len()];
        let mut count = 0usize;
        let mut more_coming = false;
        for r in results {
            for i in 0..sum.len() {
                sum[i] += r.scores[i];
            }
            more_coming |= r.more_coming;
            count += 1;
        }
        if count == 0 {
            return ClassifierResults::empty();
        }
        for s in sum.iter_mut() {
            *s /= count as f64;
        }
        ClassifierResults {
            scores: sum,
            more_coming,
        }
    }

    pub fn sum_scores(&self) -> f64 {
        self.scores.iter().sum()
    }
}

impl Default for ClassifierResults {
    fn default() -> Self {
        Self::empty()
    }
}
