//! `LocomotionManager` (C4): the recording state machine
//! `{off, recording, sleeping, wakeup}`, dynamic accuracy control, and the
//! fallback timer. Owns no sensors directly -- it drives them through the
//! `LocationProvider`/`MotionProvider` collaborator traits (§6) and reports
//! every transition through the `EventBus`.

use crate::config::ManagerConfig;
use crate::error::{LocoError, Result};
use crate::events::{Event, EventBus};
use loci_types::{MovingState, RecordingState};
use std::sync::Arc;

/// Inbound collaborator: the host's location subsystem. Implemented outside
/// this crate; the manager only ever calls through this trait.
pub trait LocationProvider: Send + Sync {
    fn has_permission(&self) -> bool;
    fn request_permission(&self, background: bool) -> bool;
    fn start(&self);
    fn stop(&self);
    fn set_desired_accuracy(&self, metres: f64);
    fn set_distance_filter(&self, metres: f64);
}

/// Inbound collaborator: pedometer/device-motion sensors.
pub trait MotionProvider: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

pub struct LocomotionManager {
    config: ManagerConfig,
    events: Arc<EventBus>,
    state: RecordingState,
    moving_state: MovingState,
    stationary_continuous_since: Option<f64>,
    desired_accuracy: f64,
    last_accuracy_raise: f64,
    last_accuracy_lower: f64,
    last_fallback_update: f64,
    next_wakeup_at: Option<f64>,
    saw_location_during_wakeup: bool,
}

impl LocomotionManager {
    pub fn new(config: ManagerConfig, events: Arc<EventBus>) -> Self {
        let desired_accuracy = config.max_desired_accuracy;
        Self {
            config,
            events,
            state: RecordingState::Off,
            moving_state: MovingState::Uncertain,
            stationary_continuous_since: None,
            desired_accuracy,
            last_accuracy_raise: f64::NEG_INFINITY,
            last_accuracy_lower: f64::NEG_INFINITY,
            last_fallback_update: f64::NEG_INFINITY,
            next_wakeup_at: None,
            saw_location_during_wakeup: false,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn moving_state(&self) -> MovingState {
        self.moving_state
    }

    fn transition(&mut self, state: RecordingState) {
        self.state = state;
        self.events.emit(Event::RecordingStateChanged { state });
    }

    /// `off -> recording`, iff location permission is held. A missing
    /// permission is not an error the caller must fail over: it's recovered
    /// locally (no transition, no event, just a surfaced error for logging).
    pub fn start_recording(&mut self, location: &dyn LocationProvider, now: f64) -> Result<()> {
        if self.state != RecordingState::Off {
            return Ok(());
        }
        if !location.has_permission() {
            tracing::warn!("start_recording refused: location permission not granted");
            return Err(LocoError::PermissionDenied);
        }
        tracing::debug!(?now, "starting recording");
        self.events.emit(Event::WillStartRecording);
        location.set_desired_accuracy(self.config.max_desired_accuracy);
        location.start();
        self.last_fallback_update = now;
        self.transition(RecordingState::Recording);
        Ok(())
    }

    pub fn stop_recording(&mut self, location: &dyn LocationProvider, motion: &dyn MotionProvider) {
        if self.state == RecordingState::Off {
            return;
        }
        self.events.emit(Event::WillStopRecording);
        location.stop();
        motion.stop();
        self.stationary_continuous_since = None;
        self.next_wakeup_at = None;
        self.transition(RecordingState::Off);
    }

    pub fn fallback_due(&self, now: f64) -> bool {
        now - self.last_fallback_update >= self.config.fallback_update_secs
    }

    pub fn next_wakeup_at(&self) -> Option<f64> {
        self.next_wakeup_at
    }

    /// Called on every new present sample (or fallback-timer tick with the
    /// last-known moving state, `has_new_location = false`).
    pub fn handle_sample(
        &mut self,
        moving_state: MovingState,
        has_new_location: bool,
        achieved_accuracy: f64,
        now: f64,
        location: &dyn LocationProvider,
        motion: &dyn MotionProvider,
    ) {
        if self.state == RecordingState::Off {
            return;
        }

        self.last_fallback_update = now;
        if has_new_location && self.state == RecordingState::Wakeup {
            self.saw_location_during_wakeup = true;
        }

        if moving_state == MovingState::Stationary {
            self.stationary_continuous_since.get_or_insert(now);
        } else {
            self.stationary_continuous_since = None;
        }

        if self.moving_state != moving_state {
            self.moving_state = moving_state;
            self.events.emit(Event::MovingStateChanged { state: moving_state });
        }

        match self.state {
            RecordingState::Recording => {
                self.apply_dynamic_accuracy(achieved_accuracy, moving_state, now, location);
                if self.config.use_low_power_sleep {
                    if let Some(since) = self.stationary_continuous_since {
                        if now - since >= self.config.sleep_after_stationary_secs {
                            self.enter_sleep(now, location, motion);
                        }
                    }
                }
            }
            RecordingState::Wakeup => {
                self.apply_dynamic_accuracy(achieved_accuracy, moving_state, now, location);
                let should_sleep = moving_state == MovingState::Stationary
                    || (moving_state == MovingState::Uncertain
                        && self.config.ignore_no_location_during_wakeups
                        && !self.saw_location_during_wakeup);
                if should_sleep {
                    self.enter_sleep(now, location, motion);
                } else if moving_state == MovingState::Moving {
                    self.enter_recording(motion);
                }
            }
            RecordingState::Sleeping | RecordingState::Off => {}
        }
    }

    fn enter_sleep(&mut self, now: f64, location: &dyn LocationProvider, motion: &dyn MotionProvider) {
        tracing::debug!(?now, next_wakeup_secs = self.config.sleep_cycle_secs, "entering low-power sleep");
        self.events.emit(Event::WillStartSleep);
        motion.stop();
        self.desired_accuracy = ManagerConfig::ACCURACY_STEPS[0];
        location.set_desired_accuracy(self.desired_accuracy);
        location.set_distance_filter(self.desired_accuracy);
        self.next_wakeup_at = Some(now + self.config.sleep_cycle_secs);
        self.transition(RecordingState::Sleeping);
    }

    fn enter_recording(&mut self, motion: &dyn MotionProvider) {
        self.events.emit(Event::WillStopSleep);
        motion.start();
        self.next_wakeup_at = None;
        self.transition(RecordingState::Recording);
    }

    /// `sleeping -> wakeup` on the scheduled timer: tighten accuracy back to
    /// `maxDesiredAccuracy`, restart motion sensors briefly.
    pub fn wakeup_tick(&mut self, location: &dyn LocationProvider, motion: &dyn MotionProvider) {
        if self.state != RecordingState::Sleeping {
            return;
        }
        self.desired_accuracy = self.config.max_desired_accuracy;
        location.set_desired_accuracy(self.desired_accuracy);
        location.set_distance_filter(0.0);
        motion.start();
        self.saw_location_during_wakeup = false;
        self.next_wakeup_at = None;
        self.transition(RecordingState::Wakeup);
    }

    /// Periodically tighten or loosen the requested accuracy. Raises run at
    /// most every `raiseAccuracyIntervalSecs`, lowers at most every
    /// `lowerAccuracyIntervalSecs`; a stationary sample with poor achieved
    /// accuracy forces the floor back to the coarsest step regardless of
    /// timing.
    fn apply_dynamic_accuracy(
        &mut self,
        achieved_accuracy: f64,
        moving_state: MovingState,
        now: f64,
        location: &dyn LocationProvider,
    ) {
        if moving_state == MovingState::Stationary
            && achieved_accuracy >= self.config.stationary_coarsening_threshold
        {
            let coarsest = ManagerConfig::ACCURACY_STEPS[0];
            if self.desired_accuracy != coarsest {
                self.desired_accuracy = coarsest;
                location.set_desired_accuracy(self.desired_accuracy);
            }
            return;
        }

        let next = ManagerConfig::ACCURACY_STEPS
            .iter()
            .copied()
            .find(|step| *step < achieved_accuracy)
            .unwrap_or(*ManagerConfig::ACCURACY_STEPS.last().unwrap())
            .max(self.config.max_desired_accuracy);

        if next < self.desired_accuracy {
            if now - self.last_accuracy_raise < self.config.raise_accuracy_interval_secs {
                return;
            }
            self.last_accuracy_raise = now;
        } else if next > self.desired_accuracy {
            if now - self.last_accuracy_lower < self.config.lower_accuracy_interval_secs {
                return;
            }
            self.last_accuracy_lower = now;
        } else {
            return;
        }

        self.desired_accuracy = next;
        location.set_desired_accuracy(self.desired_accuracy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeLocation {
        permission: AtomicBool,
    }

    impl LocationProvider for FakeLocation {
        fn has_permission(&self) -> bool {
            self.permission.load(Ordering::SeqCst)
        }
        fn request_permission(&self, _background: bool) -> bool {
            true
        }
        fn start(&self) {}
        fn stop(&self) {}
        fn set_desired_accuracy(&self, _metres: f64) {}
        fn set_distance_filter(&self, _metres: f64) {}
    }

    struct FakeMotion;
    impl MotionProvider for FakeMotion {
        fn start(&self) {}
        fn stop(&self) {}
    }

    #[test]
    fn start_recording_requires_permission() {
        let events = Arc::new(EventBus::new());
        let mut manager = LocomotionManager::new(ManagerConfig::default(), events);
        let location = FakeLocation {
            permission: AtomicBool::new(false),
        };
        let err = manager.start_recording(&location, 0.0).unwrap_err();
        assert!(matches!(err, LocoError::PermissionDenied));
        assert_eq!(manager.state(), RecordingState::Off);
    }

    #[test]
    fn enters_sleep_after_sustained_stationary() {
        let events = Arc::new(EventBus::new());
        let mut manager = LocomotionManager::new(ManagerConfig::default(), events);
        let location = FakeLocation {
            permission: AtomicBool::new(true),
        };
        let motion = FakeMotion;
        manager.start_recording(&location, 0.0).unwrap();

        for t in 0..200 {
            manager.handle_sample(MovingState::Stationary, true, 10.0, t as f64, &location, &motion);
        }
        assert_eq!(manager.state(), RecordingState::Sleeping);
    }

    #[test]
    fn wakeup_returns_to_recording_when_moving() {
        let events = Arc::new(EventBus::new());
        let mut manager = LocomotionManager::new(ManagerConfig::default(), events);
        let location = FakeLocation {
            permission: AtomicBool::new(true),
        };
        let motion = FakeMotion;
        manager.start_recording(&location, 0.0).unwrap();
        for t in 0..200 {
            manager.handle_sample(MovingState::Stationary, true, 10.0, t as f64, &location, &motion);
        }
        manager.wakeup_tick(&location, &motion);
        assert_eq!(manager.state(), RecordingState::Wakeup);

        manager.handle_sample(MovingState::Moving, true, 10.0, 260.0, &location, &motion);
        assert_eq!(manager.state(), RecordingState::Recording);
    }
}
