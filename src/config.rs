//! Layered, validated configuration for every tunable threshold named in the
//! design. Serializable to JSON/TOML, with the same layered-defaults shape.

use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Visit-specific thresholds (duration, radius clamp).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VisitConfig {
    #[serde(default = "VisitConfig::default_min_valid_duration_secs")]
    pub min_valid_duration_secs: f64,
    #[serde(default = "VisitConfig::default_min_keeper_duration_secs")]
    pub min_keeper_duration_secs: f64,
    #[serde(default = "VisitConfig::default_min_radius")]
    pub min_radius: f64,
    #[serde(default = "VisitConfig::default_max_radius")]
    pub max_radius: f64,
}

impl VisitConfig {
    const fn default_min_valid_duration_secs() -> f64 {
        10.0
    }
    const fn default_min_keeper_duration_secs() -> f64 {
        120.0
    }
    const fn default_min_radius() -> f64 {
        10.0
    }
    const fn default_max_radius() -> f64 {
        150.0
    }
}

impl Default for VisitConfig {
    fn default() -> Self {
        Self {
            min_valid_duration_secs: Self::default_min_valid_duration_secs(),
            min_keeper_duration_secs: Self::default_min_keeper_duration_secs(),
            min_radius: Self::default_min_radius(),
            max_radius: Self::default_max_radius(),
        }
    }
}

/// Path-specific thresholds (duration, distance).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "PathConfig::default_min_valid_duration_secs")]
    pub min_valid_duration_secs: f64,
    #[serde(default = "PathConfig::default_min_valid_distance")]
    pub min_valid_distance: f64,
    #[serde(default = "PathConfig::default_min_keeper_duration_secs")]
    pub min_keeper_duration_secs: f64,
    #[serde(default = "PathConfig::default_min_keeper_distance")]
    pub min_keeper_distance: f64,
}

impl PathConfig {
    const fn default_min_valid_duration_secs() -> f64 {
        10.0
    }
    const fn default_min_valid_distance() -> f64 {
        10.0
    }
    const fn default_min_keeper_duration_secs() -> f64 {
        60.0
    }
    const fn default_min_keeper_distance() -> f64 {
        20.0
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            min_valid_duration_secs: Self::default_min_valid_duration_secs(),
            min_valid_distance: Self::default_min_valid_distance(),
            min_keeper_duration_secs: Self::default_min_keeper_duration_secs(),
            min_keeper_distance: Self::default_min_keeper_distance(),
        }
    }
}

/// `ActivityBrain` tunables: window size and the moving-state decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default = "BrainConfig::default_window_secs")]
    pub window_secs: f64,
    #[serde(default = "BrainConfig::default_movement_threshold_floor")]
    pub movement_threshold_floor: f64,
    #[serde(default = "BrainConfig::default_stationary_dwell_secs")]
    pub stationary_dwell_secs: f64,
    #[serde(default = "BrainConfig::default_location_ttl_secs")]
    pub location_ttl_secs: f64,
}

impl BrainConfig {
    const fn default_window_secs() -> f64 {
        60.0
    }
    const fn default_movement_threshold_floor() -> f64 {
        50.0
    }
    const fn default_stationary_dwell_secs() -> f64 {
        60.0
    }
    const fn default_location_ttl_secs() -> f64 {
        60.0
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            window_secs: Self::default_window_secs(),
            movement_threshold_floor: Self::default_movement_threshold_floor(),
            stationary_dwell_secs: Self::default_stationary_dwell_secs(),
            location_ttl_secs: Self::default_location_ttl_secs(),
        }
    }
}

/// `LocomotionManager` recording-state-machine tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "ManagerConfig::default_sleep_after_stationary_secs")]
    pub sleep_after_stationary_secs: f64,
    #[serde(default = "ManagerConfig::default_sleep_cycle_secs")]
    pub sleep_cycle_secs: f64,
    #[serde(default = "ManagerConfig::default_use_low_power_sleep")]
    pub use_low_power_sleep: bool,
    #[serde(default = "ManagerConfig::default_ignore_no_location_during_wakeups")]
    pub ignore_no_location_during_wakeups: bool,
    #[serde(default = "ManagerConfig::default_max_desired_accuracy")]
    pub max_desired_accuracy: f64,
    #[serde(default = "ManagerConfig::default_fallback_update_secs")]
    pub fallback_update_secs: f64,
    #[serde(default = "ManagerConfig::default_raise_accuracy_interval_secs")]
    pub raise_accuracy_interval_secs: f64,
    #[serde(default = "ManagerConfig::default_lower_accuracy_interval_secs")]
    pub lower_accuracy_interval_secs: f64,
    #[serde(default = "ManagerConfig::default_stationary_coarsening_threshold")]
    pub stationary_coarsening_threshold: f64,
}

impl ManagerConfig {
    const fn default_sleep_after_stationary_secs() -> f64 {
        180.0
    }
    const fn default_sleep_cycle_secs() -> f64 {
        60.0
    }
    const fn default_use_low_power_sleep() -> bool {
        true
    }
    const fn default_ignore_no_location_during_wakeups() -> bool {
        true
    }
    const fn default_max_desired_accuracy() -> f64 {
        10.0
    }
    const fn default_fallback_update_secs() -> f64 {
        30.0
    }
    const fn default_raise_accuracy_interval_secs() -> f64 {
        10.0
    }
    const fn default_lower_accuracy_interval_secs() -> f64 {
        60.0
    }
    const fn default_stationary_coarsening_threshold() -> f64 {
        65.0
    }

    /// The ordered accuracy steps the manager picks from: coarsest first.
    pub const ACCURACY_STEPS: [f64; 4] = [100.0, 10.0, 3.0, 1.0];
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sleep_after_stationary_secs: Self::default_sleep_after_stationary_secs(),
            sleep_cycle_secs: Self::default_sleep_cycle_secs(),
            use_low_power_sleep: Self::default_use_low_power_sleep(),
            ignore_no_location_during_wakeups: Self::default_ignore_no_location_during_wakeups(),
            max_desired_accuracy: Self::default_max_desired_accuracy(),
            fallback_update_secs: Self::default_fallback_update_secs(),
            raise_accuracy_interval_secs: Self::default_raise_accuracy_interval_secs(),
            lower_accuracy_interval_secs: Self::default_lower_accuracy_interval_secs(),
            stationary_coarsening_threshold: Self::default_stationary_coarsening_threshold(),
        }
    }
}

/// `TimelineRecorder` / retention tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "RecorderConfig::default_samples_per_minute")]
    pub samples_per_minute: f64,
    #[serde(default = "RecorderConfig::default_history_retention_secs")]
    pub timeline_item_history_retention_secs: f64,
    #[serde(default = "RecorderConfig::default_keep_deleted_for_secs")]
    pub keep_deleted_for_secs: f64,
    #[serde(default = "RecorderConfig::default_data_gap_threshold_secs")]
    pub data_gap_threshold_secs: f64,
}

impl RecorderConfig {
    const fn default_samples_per_minute() -> f64 {
        60.0
    }
    const fn default_history_retention_secs() -> f64 {
        6.0 * 3600.0
    }
    const fn default_keep_deleted_for_secs() -> f64 {
        3600.0
    }
    const fn default_data_gap_threshold_secs() -> f64 {
        5.0 * 60.0
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            samples_per_minute: Self::default_samples_per_minute(),
            timeline_item_history_retention_secs: Self::default_history_retention_secs(),
            keep_deleted_for_secs: Self::default_keep_deleted_for_secs(),
            data_gap_threshold_secs: Self::default_data_gap_threshold_secs(),
        }
    }
}

/// `MergeEngine` tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "MergeConfig::default_max_mergeable_distance_multiplier")]
    pub max_mergeable_distance_multiplier: f64,
    /// §9 open question: the active rule returns `medium` unconditionally
    /// unless this is enabled, in which case the richer scored variant runs.
    #[serde(default)]
    pub activity_type_separation_enabled: bool,
}

impl MergeConfig {
    const fn default_max_mergeable_distance_multiplier() -> f64 {
        4.0
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_mergeable_distance_multiplier: Self::default_max_mergeable_distance_multiplier(),
            activity_type_separation_enabled: false,
        }
    }
}

/// `TimelineStore` batching tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_batch_flush_size")]
    pub batch_flush_size: usize,
}

impl StoreConfig {
    const fn default_batch_flush_size() -> usize {
        50
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_flush_size: Self::default_batch_flush_size(),
        }
    }
}

/// `ModelUpdater` tunables: the per-depth training-sample cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "ModelConfig::default_max_training_samples")]
    pub max_training_samples: [usize; 3],
}

impl ModelConfig {
    const fn default_max_training_samples() -> [usize; 3] {
        [5_000, 2_000, 500]
    }

    pub fn max_training_samples_for_depth(&self, depth: u8) -> usize {
        self.max_training_samples[(depth as usize).min(2)]
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_training_samples: Self::default_max_training_samples(),
        }
    }
}

/// The top-level configuration: collects every tunable named throughout the
/// design into one validated, serializable struct with sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub visit: VisitConfig,
    #[serde(default)]
    pub path: PathConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.visit.min_radius > self.visit.max_radius {
            return Err("visit.min_radius must be <= visit.max_radius".into());
        }
        if self.visit.min_valid_duration_secs <= 0.0 {
            return Err("visit.min_valid_duration_secs must be positive".into());
        }
        if self.visit.min_keeper_duration_secs < self.visit.min_valid_duration_secs {
            return Err("visit.min_keeper_duration_secs must be >= min_valid_duration_secs".into());
        }
        if self.path.min_keeper_duration_secs < self.path.min_valid_duration_secs {
            return Err("path.min_keeper_duration_secs must be >= min_valid_duration_secs".into());
        }
        if self.path.min_keeper_distance < self.path.min_valid_distance {
            return Err("path.min_keeper_distance must be >= min_valid_distance".into());
        }
        if self.store.batch_flush_size == 0 {
            return Err("store.batch_flush_size must be greater than zero".into());
        }
        if self.recorder.samples_per_minute <= 0.0 {
            return Err("recorder.samples_per_minute must be positive".into());
        }
        Ok(())
    }

    pub fn min_recording_interval(&self) -> Duration {
        Duration::from_secs_f64((60.0 / self.recorder.samples_per_minute).max(0.0))
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        config
            .validate()
            .map_err(serde_json::Error::custom)?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate().map_err(toml::de::Error::custom)?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_radius_clamp() {
        let mut config = Config::default();
        config.visit.min_radius = 200.0;
        config.visit.max_radius = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let mut config = Config::default();
        config.merge.activity_type_separation_enabled = true;
        let json = config.to_json().unwrap();
        let restored = Config::from_json(&json).unwrap();
        assert_eq!(
            restored.merge.activity_type_separation_enabled,
            config.merge.activity_type_separation_enabled
        );
    }

    #[test]
    fn min_recording_interval_matches_rate_cap() {
        let config = Config::default();
        assert_eq!(config.min_recording_interval(), Duration::from_secs(1));
    }
}
