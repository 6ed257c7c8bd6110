//! `LocomotionSample` (C3): an immutable point-in-time record combining
//! location, motion, classifier result, and confirmed type.

use loci_types::{ActivityType, ClassifierResults, ItemId, LocationFix, SampleId, SampleSource};
use loci_types::{MovingState, RecordingState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocomotionSample {
    pub id: SampleId,
    /// Seconds since the UNIX epoch. Assigned monotonically on creation.
    pub timestamp: f64,
    pub location: Option<LocationFix>,
    pub moving_state: MovingState,
    pub recording_state: RecordingState,
    pub step_hz: f64,
    pub xy_acceleration: f64,
    pub z_acceleration: f64,
    pub course_variance: f64,
    pub core_motion_type: Option<ActivityType>,
    pub classifier_results: Option<ClassifierResults>,
    /// User-confirmed ground truth. Only ever written by an external
    /// collaborator (the UI); the engine never sets this itself.
    pub confirmed_type: Option<ActivityType>,
    /// Last model output. May be refreshed at any time.
    pub classified_type: Option<ActivityType>,
    pub source: SampleSource,
    pub item_id: Option<ItemId>,
    pub deleted: bool,
}

impl LocomotionSample {
    pub fn new(timestamp: f64, moving_state: MovingState, recording_state: RecordingState) -> Self {
        Self {
            id: SampleId::new(),
            timestamp,
            location: None,
            moving_state,
            recording_state,
            step_hz: 0.0,
            xy_acceleration: 0.0,
            z_acceleration: 0.0,
            course_variance: 0.0,
            core_motion_type: None,
            classifier_results: None,
            confirmed_type: None,
            classified_type: None,
            source: SampleSource::Recorded,
            item_id: None,
            deleted: false,
        }
    }

    pub fn with_location(mut self, location: LocationFix) -> Self {
        self.location = Some(location);
        self
    }

    /// `hasUsableCoordinate`: coordinate is valid, non-null-island, with
    /// positive horizontal accuracy.
    pub fn has_usable_coordinate(&self) -> bool {
        self.location.is_some_and(|l| l.has_usable_coordinate())
    }

    pub fn coordinate(&self) -> Option<loci_types::Coordinate> {
        self.location.map(|l| l.coordinate)
    }

    /// The best-guess label for this sample: confirmed ground truth if
    /// present, otherwise the live classifier's best score, otherwise the
    /// last classified type, otherwise unknown.
    pub fn best_effort_type(&self) -> ActivityType {
        if let Some(confirmed) = self.confirmed_type {
            return confirmed;
        }
        if let Some(results) = &self.classifier_results {
            return results.best().0;
        }
        self.classified_type.unwrap_or(ActivityType::Unknown)
    }

    pub fn attach_to(&mut self, item_id: ItemId) {
        self.item_id = Some(item_id);
    }

    pub fn detach(&mut self) {
        self.item_id = None;
    }

    /// Soft-delete. Per the design, samples are never mutated after this.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loci_types::Coordinate;

    fn fix(lat: f64, lon: f64, h_accuracy: f64) -> LocationFix {
        LocationFix {
            coordinate: Coordinate::new(lat, lon),
            horizontal_accuracy: h_accuracy,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 0.0,
            timestamp: 0.0,
        }
    }

    #[test]
    fn usable_coordinate_requires_positive_accuracy() {
        let sample = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording)
            .with_location(fix(35.68, 139.76, 0.0));
        assert!(!sample.has_usable_coordinate());

        let sample = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording)
            .with_location(fix(35.68, 139.76, 10.0));
        assert!(sample.has_usable_coordinate());
    }

    #[test]
    fn null_island_is_not_usable() {
        let sample = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording)
            .with_location(fix(0.0, 0.0, 10.0));
        assert!(!sample.has_usable_coordinate());
    }

    #[test]
    fn best_effort_type_prefers_confirmed() {
        let mut sample =
            LocomotionSample::new(0.0, MovingState::Moving, RecordingState::Recording);
        sample.classified_type = Some(ActivityType::Car);
        sample.confirmed_type = Some(ActivityType::Walking);
        assert_eq!(sample.best_effort_type(), ActivityType::Walking);
    }
}
