//! `Engine` (A4): a cloneable, thread-safe handle gating the four named
//! serial queues of the concurrency model -- `sensor`, `recorder`,
//! `store-write`, `updater` -- behind real worker threads and channels.
//!
//! Generalises a single `Arc<parking_lot::RwLock<Inner>>` wrapper into four
//! routed queues: strict ordering is needed *per queue*, not just mutual
//! exclusion, so one lock isn't enough -- a sample dispatched to the
//! `recorder` queue must never interleave with another sample already in
//! flight there, while a concurrent `store` read or an `updater` training
//! pass must be free to run alongside it.

use crate::brain::ActivityBrain;
use crate::config::Config;
use crate::error::{LocoError, Result};
use crate::events::EventBus;
use crate::manager::{LocationProvider, LocomotionManager, MotionProvider};
use crate::model::ClassifierModelMeta;
use crate::recorder::TimelineRecorder;
use crate::sample::LocomotionSample;
use crate::storage::StorageBackend;
use crate::store::TimelineStore;
use crate::updater::ModelUpdater;
use loci_types::{ActivityType, ItemId, LocationFix, MovingState, RecordingState, SampleId};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single named OS thread draining a job queue in admission order.
struct Queue {
    sender: mpsc::Sender<Job>,
    name: &'static str,
}

impl Queue {
    fn spawn(name: &'static str) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.to_string();
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn queue worker thread");
        Self { sender, name }
    }

    /// Run `f` on this queue and block for its result. The closure (and its
    /// return value) must be `Send`, since it crosses to the worker thread
    /// and the reply crosses back.
    fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.sender
            .send(job)
            .map_err(|_| LocoError::EngineUnavailable(self.name.to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| LocoError::EngineUnavailable(self.name.to_string()))
    }

    /// Fire-and-forget: enqueue without waiting for completion.
    fn spawn_job<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Box::new(f))
            .map_err(|_| LocoError::EngineUnavailable(self.name.to_string()))
    }
}

struct EngineShared<B: StorageBackend + 'static> {
    sensor: Queue,
    recorder_queue: Queue,
    store_write: Queue,
    updater_queue: Queue,

    brain: Mutex<ActivityBrain>,
    manager: Mutex<LocomotionManager>,
    recorder: Mutex<TimelineRecorder>,
    store: Arc<TimelineStore<B>>,
    updater: Arc<ModelUpdater>,
    events: Arc<EventBus>,
    config: Config,
}

/// The crate-level entry point: owns every stage of the pipeline and routes
/// calls onto the queue each stage is specified to run on. Cheap to clone --
/// every clone shares the same worker threads and the same store.
pub struct Engine<B: StorageBackend + 'static> {
    shared: Arc<EngineShared<B>>,
}

impl<B: StorageBackend + 'static> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B: StorageBackend + 'static> Engine<B> {
    pub fn new(config: Config, backend: B, events: Arc<EventBus>) -> Result<Self> {
        let store = Arc::new(TimelineStore::open(backend, config.store, events.clone())?);
        let brain = Mutex::new(ActivityBrain::new(config.brain));
        let manager = Mutex::new(LocomotionManager::new(config.manager, events.clone()));
        let recorder = Mutex::new(TimelineRecorder::new(config.clone(), events.clone()));
        let updater = Arc::new(ModelUpdater::new(config.clone()));

        Ok(Self {
            shared: Arc::new(EngineShared {
                sensor: Queue::spawn("loci-sensor"),
                recorder_queue: Queue::spawn("loci-recorder"),
                store_write: Queue::spawn("loci-store-write"),
                updater_queue: Queue::spawn("loci-updater"),
                brain,
                manager,
                recorder,
                store,
                updater,
                events,
                config,
            }),
        })
    }

    /// Direct access to the store for reads (`get_item`, `find_items`, ...).
    /// Its own internal `RwLock` already lets concurrent readers run without
    /// serializing behind the store-write queue.
    pub fn store(&self) -> &Arc<TimelineStore<B>> {
        &self.shared.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    // ---- sensor queue --------------------------------------------------

    pub fn recording_state(&self) -> Result<RecordingState> {
        let shared = self.shared.clone();
        self.shared.sensor.run(move || shared.manager.lock().state())
    }

    pub fn moving_state(&self) -> Result<MovingState> {
        let shared = self.shared.clone();
        self.shared.sensor.run(move || shared.manager.lock().moving_state())
    }

    pub fn start_recording(&self, location: Arc<dyn LocationProvider>, now: f64) -> Result<()> {
        let shared = self.shared.clone();
        self.shared
            .sensor
            .run(move || shared.manager.lock().start_recording(location.as_ref(), now))?
    }

    pub fn stop_recording(&self, location: Arc<dyn LocationProvider>, motion: Arc<dyn MotionProvider>) -> Result<()> {
        let shared = self.shared.clone();
        self.shared.sensor.run(move || {
            shared.manager.lock().stop_recording(location.as_ref(), motion.as_ref());
        })
    }

    /// Admit one raw location fix: updates the `ActivityBrain`'s rolling
    /// window, recomputes the present sample, drives the recording state
    /// machine, and (if recording) hands the resulting sample down to the
    /// `recorder` queue. Returns `false` if the sample was rate-capped.
    pub fn ingest_location(
        &self,
        fix: LocationFix,
        location: Arc<dyn LocationProvider>,
        motion: Arc<dyn MotionProvider>,
    ) -> Result<bool> {
        let shared = self.shared.clone();
        let outcome = self.shared.sensor.run(move || {
            let present = {
                let mut brain = shared.brain.lock();
                brain.add_location(fix);
                brain.update(fix.timestamp)
            };
            let achieved_accuracy = present.location.map(|l| l.horizontal_accuracy).unwrap_or(f64::MAX);
            let mut manager = shared.manager.lock();
            manager.handle_sample(present.moving_state, true, achieved_accuracy, fix.timestamp, location.as_ref(), motion.as_ref());
            let recording_state = manager.state();
            (present, recording_state)
        })?;
        let (present, recording_state) = outcome;
        if recording_state != RecordingState::Recording {
            return Ok(false);
        }
        let sample = present_sample_to_sample(&present, recording_state);
        self.record_sample(sample)
    }

    /// Fallback-timer tick: re-evaluates the state machine with the last
    /// known moving state rather than a fresh location.
    pub fn wakeup_tick(&self, location: Arc<dyn LocationProvider>, motion: Arc<dyn MotionProvider>, now: f64) -> Result<()> {
        let shared = self.shared.clone();
        self.shared.sensor.run(move || {
            let moving_state = shared.brain.lock().moving_state();
            shared
                .manager
                .lock()
                .handle_sample(moving_state, false, f64::MAX, now, location.as_ref(), motion.as_ref());
        })
    }

    // ---- recorder queue -------------------------------------------------

    fn record_sample(&self, sample: LocomotionSample) -> Result<bool> {
        let shared = self.shared.clone();
        let confirmed = sample.confirmed_type.map(|t| (sample.clone(), t));
        let recorded = self
            .shared
            .recorder_queue
            .run(move || shared.recorder.lock().record(shared.store.as_ref(), sample))??;
        if let Some((sample, _)) = confirmed {
            let shared = self.shared.clone();
            let now = sample.timestamp;
            self.shared.updater_queue.spawn_job(move || {
                shared.updater.on_confirmed_sample(&sample, now);
            })?;
        }
        Ok(recorded)
    }

    pub fn active_items(&self) -> Result<Vec<ItemId>> {
        let shared = self.shared.clone();
        self.shared.recorder_queue.run(move || shared.recorder.lock().active_items().to_vec())
    }

    // ---- store-write queue ----------------------------------------------

    pub fn delete_item(&self, id: ItemId) -> Result<()> {
        let shared = self.shared.clone();
        self.shared.store_write.run(move || shared.store.delete_item(id))?
    }

    pub fn flush(&self) -> Result<()> {
        let shared = self.shared.clone();
        self.shared.store_write.run(move || shared.store.flush())?
    }

    /// Drops items/samples soft-deleted for longer than `keep_deleted_for_secs`.
    pub fn purge_deleted(&self, now: f64) -> Result<usize> {
        let shared = self.shared.clone();
        let keep_for = self.shared.config.recorder.keep_deleted_for_secs;
        self.shared.store_write.run(move || shared.store.purge_deleted(now, keep_for))?
    }

    /// Attach a user-confirmed ground-truth label to a sample, save it, and
    /// notify the `updater` queue so the enclosing region gets retrained.
    pub fn confirm_sample_type(&self, sample_id: SampleId, confirmed: ActivityType, now: f64) -> Result<()> {
        let shared = self.shared.clone();
        let confirmed_sample = self.shared.store_write.run(move || {
            let Some(mut sample) = shared.store.get_sample(sample_id) else {
                return Err(LocoError::NotFound(format!("sample {sample_id:?}")));
            };
            sample.confirmed_type = Some(confirmed);
            shared.store.save_sample(sample.clone(), true)?;
            Ok(sample)
        })??;
        let shared = self.shared.clone();
        self.shared.updater_queue.spawn_job(move || {
            shared.updater.on_confirmed_sample(&confirmed_sample, now);
        })
    }

    // ---- updater queue ----------------------------------------------------

    pub fn model_meta(&self, geo_key: &str) -> Result<Option<ClassifierModelMeta>> {
        let shared = self.shared.clone();
        let geo_key = geo_key.to_string();
        self.shared.updater_queue.run(move || shared.updater.meta_for(&geo_key))
    }

    pub fn pending_model_count(&self) -> Result<usize> {
        let shared = self.shared.clone();
        self.shared.updater_queue.run(move || shared.updater.pending_count())
    }

    /// Drive one step of the background model-training job: trains at most
    /// one pending model against samples currently in the store. Returns
    /// `true` if a model was (re)trained.
    pub fn train_pending_model(&self, now: f64) -> Result<bool> {
        let shared = self.shared.clone();
        self.shared
            .updater_queue
            .run(move || shared.updater.train_one_pending(shared.store.as_ref(), now))?
    }
}

fn present_sample_to_sample(present: &crate::brain::PresentSample, recording_state: RecordingState) -> LocomotionSample {
    let mut sample = LocomotionSample::new(present.timestamp, present.moving_state, recording_state);
    if let Some(location) = present.location {
        sample = sample.with_location(location);
    }
    sample.step_hz = present.step_hz;
    sample.xy_acceleration = present.xy_acceleration;
    sample.z_acceleration = present.z_acceleration;
    sample.course_variance = present.course_variance;
    sample.core_motion_type = present.core_motion_type;
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::TimelineItem;
    use crate::storage::MemoryBackend;
    use loci_types::Coordinate;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysOnLocation {
        permitted: AtomicBool,
        started: AtomicBool,
    }

    impl AlwaysOnLocation {
        fn new() -> Self {
            Self {
                permitted: AtomicBool::new(true),
                started: AtomicBool::new(false),
            }
        }
    }

    impl LocationProvider for AlwaysOnLocation {
        fn has_permission(&self) -> bool {
            self.permitted.load(Ordering::SeqCst)
        }
        fn request_permission(&self, _background: bool) -> bool {
            true
        }
        fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
        }
        fn stop(&self) {
            self.started.store(false, Ordering::SeqCst);
        }
        fn set_desired_accuracy(&self, _metres: f64) {}
        fn set_distance_filter(&self, _metres: f64) {}
    }

    struct NoopMotion;
    impl MotionProvider for NoopMotion {
        fn start(&self) {}
        fn stop(&self) {}
    }

    fn fix(t: f64, lat: f64, lon: f64) -> LocationFix {
        LocationFix {
            coordinate: Coordinate::new(lat, lon),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 1.0,
            timestamp: t,
        }
    }

    fn engine() -> Engine<MemoryBackend> {
        Engine::new(Config::default(), MemoryBackend::new(), Arc::new(EventBus::new())).unwrap()
    }

    #[test]
    fn start_recording_without_permission_is_refused() {
        let engine = engine();
        let location: Arc<dyn LocationProvider> = Arc::new({
            let p = AlwaysOnLocation::new();
            p.permitted.store(false, Ordering::SeqCst);
            p
        });
        let err = engine.start_recording(location, 0.0).unwrap_err();
        assert!(matches!(err, LocoError::PermissionDenied));
    }

    #[test]
    fn ingesting_locations_while_recording_produces_a_timeline_item() {
        let engine = engine();
        let location: Arc<dyn LocationProvider> = Arc::new(AlwaysOnLocation::new());
        let motion: Arc<dyn MotionProvider> = Arc::new(NoopMotion);

        engine.start_recording(location.clone(), 0.0).unwrap();
        assert_eq!(engine.recording_state().unwrap(), RecordingState::Recording);

        for t in 0..70 {
            engine
                .ingest_location(fix(t as f64, 35.68, 139.76), location.clone(), motion.clone())
                .unwrap();
        }

        let active = engine.active_items().unwrap();
        assert!(!active.is_empty());
        let total_samples: usize = active
            .iter()
            .filter_map(|id| engine.store().get_item(*id))
            .map(|item: TimelineItem| item.sample_count())
            .sum();
        assert!(total_samples > 0);
    }

    #[test]
    fn confirming_a_sample_type_saves_it_and_marks_its_region_pending() {
        let engine = engine();
        let location: Arc<dyn LocationProvider> = Arc::new(AlwaysOnLocation::new());
        let motion: Arc<dyn MotionProvider> = Arc::new(NoopMotion);
        engine.start_recording(location.clone(), 0.0).unwrap();
        engine.ingest_location(fix(0.0, 35.68, 139.76), location, motion).unwrap();

        let item_id = engine.active_items().unwrap()[0];
        let item: TimelineItem = engine.store().get_item(item_id).unwrap();
        let sample_id = item.samples()[0].id;

        engine.confirm_sample_type(sample_id, ActivityType::Walking, 1.0).unwrap();
        let confirmed = engine.store().get_sample(sample_id).unwrap();
        assert_eq!(confirmed.confirmed_type, Some(ActivityType::Walking));

        // `pending_model_count` is dispatched on the same serial `updater`
        // queue as the fire-and-forget `on_confirmed_sample` job above, so
        // by FIFO ordering it only runs once that job has already landed.
        assert!(engine.pending_model_count().unwrap() > 0);
    }
}
