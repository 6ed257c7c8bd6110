//! `ActivityBrain` (C2): owns a rolling window of raw+filtered locations and
//! emits a present sample with a moving-state decision. Runs serialised,
//! expected to be driven only from the `sensor` queue (§5).

use crate::config::BrainConfig;
use crate::kalman::{KalmanFilter, PositionFilter};
use crate::spatial;
use loci_types::{ActivityType, Coordinate, LocationFix, MovingState};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    coordinate: Coordinate,
    timestamp: f64,
    horizontal_accuracy: f64,
    course: f64,
}

/// A snapshot of everything `LocomotionSample` needs, as of the brain's last
/// `update()`.
#[derive(Debug, Clone, Copy)]
pub struct PresentSample {
    pub location: Option<LocationFix>,
    pub moving_state: MovingState,
    pub step_hz: f64,
    pub xy_acceleration: f64,
    pub z_acceleration: f64,
    pub course_variance: f64,
    pub core_motion_type: Option<ActivityType>,
    pub timestamp: f64,
}

pub struct ActivityBrain {
    config: BrainConfig,
    window: VecDeque<WindowEntry>,
    position_filter: PositionFilter,
    altitude_filter: KalmanFilter,
    last_admitted_timestamp: Option<f64>,

    pedometer: Option<(f64, f64)>,
    prev_pedometer: Option<(f64, f64)>,
    motion: Option<(f64, f64, f64)>,
    cm_activity: Option<(ActivityType, f64)>,

    moving_state: MovingState,
    dwell_start: Option<f64>,

    present_sample: Option<PresentSample>,
}

impl ActivityBrain {
    pub fn new(config: BrainConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            position_filter: PositionFilter::new(),
            altitude_filter: KalmanFilter::new(),
            last_admitted_timestamp: None,
            pedometer: None,
            prev_pedometer: None,
            motion: None,
            cm_activity: None,
            moving_state: MovingState::Uncertain,
            dwell_start: None,
            present_sample: None,
        }
    }

    /// Admit a raw location if its timestamp moves the stream forward.
    pub fn add_location(&mut self, fix: LocationFix) {
        if let Some(last) = self.last_admitted_timestamp {
            if fix.timestamp < last {
                return;
            }
        }
        self.last_admitted_timestamp = Some(fix.timestamp);

        self.position_filter.update(
            fix.coordinate.latitude,
            fix.coordinate.longitude,
            fix.timestamp,
            fix.horizontal_accuracy,
        );
        if fix.vertical_accuracy > 0.0 {
            self.altitude_filter
                .update(fix.altitude, fix.timestamp, fix.vertical_accuracy * fix.vertical_accuracy);
        }

        if fix.has_usable_coordinate() {
            self.window.push_back(WindowEntry {
                coordinate: fix.coordinate,
                timestamp: fix.timestamp,
                horizontal_accuracy: fix.horizontal_accuracy,
                course: fix.course,
            });
        }
        self.trim_window(fix.timestamp);
    }

    pub fn add_pedometer(&mut self, step_count: f64, timestamp: f64) {
        self.prev_pedometer = self.pedometer;
        self.pedometer = Some((step_count, timestamp));
    }

    pub fn add_motion(&mut self, xy_acceleration: f64, z_acceleration: f64, timestamp: f64) {
        self.motion = Some((xy_acceleration, z_acceleration, timestamp));
    }

    pub fn add_cm_activity(&mut self, activity: ActivityType, _confidence: f64, timestamp: f64) {
        self.cm_activity = Some((activity, timestamp));
    }

    fn trim_window(&mut self, now: f64) {
        let cutoff = now - self.config.window_secs;
        while let Some(front) = self.window.front() {
            if front.timestamp < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn expire_stale(&mut self, now: f64) {
        let ttl = self.config.location_ttl_secs;
        if let Some((_, t)) = self.pedometer {
            if now - t > ttl {
                self.pedometer = None;
                self.prev_pedometer = None;
            }
        }
        if let Some((_, _, t)) = self.motion {
            if now - t > ttl {
                self.motion = None;
            }
        }
        if let Some((_, t)) = self.cm_activity {
            if now - t > ttl {
                self.cm_activity = None;
            }
        }
    }

    /// Recompute the present sample: moving-state decision, motion scalars,
    /// and the filtered location. `now` drives window trimming and TTL
    /// expiry even when no new location arrived this tick (the manager's
    /// fallback timer relies on this).
    pub fn update(&mut self, now: f64) -> PresentSample {
        self.trim_window(now);
        self.expire_stale(now);

        self.moving_state = self.decide_moving_state(now);

        let step_hz = self.compute_step_hz();
        let (xy_acceleration, z_acceleration) = self.motion.map(|(xy, z, _)| (xy, z)).unwrap_or((0.0, 0.0));
        let course_variance = self.compute_course_variance();

        let location = self.position_filter.value().map(|(lat, lon)| {
            let horizontal_accuracy = self
                .window
                .back()
                .map(|e| e.horizontal_accuracy)
                .unwrap_or(0.0);
            LocationFix {
                coordinate: Coordinate::new(lat, lon),
                horizontal_accuracy,
                vertical_accuracy: 0.0,
                speed: 0.0,
                course: self.window.back().map(|e| e.course).unwrap_or(0.0),
                altitude: self.altitude_filter.value().unwrap_or(0.0),
                timestamp: now,
            }
        });

        let sample = PresentSample {
            location,
            moving_state: self.moving_state,
            step_hz,
            xy_acceleration,
            z_acceleration,
            course_variance,
            core_motion_type: self.cm_activity.map(|(a, _)| a),
            timestamp: now,
        };
        self.present_sample = Some(sample);
        sample
    }

    pub fn present_sample(&self) -> Option<PresentSample> {
        self.present_sample
    }

    pub fn moving_state(&self) -> MovingState {
        self.moving_state
    }

    fn decide_moving_state(&mut self, now: f64) -> MovingState {
        let usable: Vec<WindowEntry> = self.window.iter().copied().collect();
        if usable.len() < 2 {
            self.dwell_start = None;
            return MovingState::Uncertain;
        }

        let center = spatial::center(usable.iter().map(|e| e.coordinate));
        let Some(center) = center else {
            self.dwell_start = None;
            return MovingState::Uncertain;
        };

        let coordinates: Vec<Coordinate> = usable.iter().map(|e| e.coordinate).collect();
        let radius = spatial::radius_of(center, &coordinates);
        let worst_accuracy = usable
            .iter()
            .map(|e| e.horizontal_accuracy)
            .fold(0.0_f64, f64::max);
        let threshold = worst_accuracy.max(self.config.movement_threshold_floor);

        if radius.sd2() > threshold {
            self.dwell_start = None;
            return MovingState::Moving;
        }

        let dwell_start = *self.dwell_start.get_or_insert(now);
        if now - dwell_start >= self.config.stationary_dwell_secs {
            MovingState::Stationary
        } else {
            self.moving_state
        }
    }

    fn compute_step_hz(&self) -> f64 {
        match (self.pedometer, self.prev_pedometer) {
            (Some((count, t)), Some((prev_count, prev_t))) if t > prev_t => {
                (count - prev_count).max(0.0) / (t - prev_t)
            }
            _ => 0.0,
        }
    }

    fn compute_course_variance(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let courses: Vec<f64> = self.window.iter().map(|e| e.course).collect();
        let mean = courses.iter().sum::<f64>() / courses.len() as f64;
        courses.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / courses.len() as f64
    }
}
