//! `loci`: an embedded, on-device movement-timeline engine.
//!
//! Ingests a stream of location/motion samples and produces a structured,
//! self-healing timeline of [`item::TimelineItem`]s -- stationary `Visit`s
//! and in-motion `Path`s -- each carrying duration, center, radius, distance
//! and a dominant-activity classification. The pipeline:
//!
//! ```text
//! sensors -> LocomotionManager -> ActivityBrain -> LocomotionSample
//!         -> TimelineRecorder -> {TimelineItem, MergeEngine, PersistentProcessor}
//!         -> TimelineStore (persisted)
//! ```
//!
//! ```rust
//! use loci::prelude::*;
//!
//! let events = std::sync::Arc::new(EventBus::new());
//! let store = TimelineStore::open(MemoryBackend::new(), StoreConfig::default(), events.clone())?;
//! let mut recorder = TimelineRecorder::new(Config::default(), events);
//!
//! let sample = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording);
//! recorder.record(&store, sample)?;
//! # Ok::<(), loci::LocoError>(())
//! ```

pub mod brain;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod item;
pub mod kalman;
pub mod manager;
pub mod merge;
pub mod model;
pub mod processor;
pub mod recorder;
pub mod sample;
pub mod spatial;
pub mod storage;
pub mod store;
pub mod updater;

#[cfg(feature = "aof")]
pub mod persistence;

pub use brain::{ActivityBrain, PresentSample};
pub use classifier::{CompositeClassifier, DiscreteClassifier, ModelProvider};
pub use config::{
    BrainConfig, Config, ManagerConfig, MergeConfig, ModelConfig, PathConfig, RecorderConfig,
    StoreConfig, VisitConfig,
};
pub use engine::Engine;
pub use error::{LocoError, Result};
pub use events::{Event, EventBus};
pub use item::{ItemKind, TimelineItem};
pub use kalman::{KalmanFilter, PositionFilter};
pub use manager::{LocationProvider, LocomotionManager, MotionProvider};
pub use merge::{ConsumptionScore, MergeEngine, MergeOutcome};
pub use model::{ClassifierModelMeta, GeoRect};
pub use processor::PersistentProcessor;
pub use recorder::TimelineRecorder;
pub use sample::LocomotionSample;
pub use store::TimelineStore;
pub use updater::ModelUpdater;

pub use storage::{MemoryBackend, StorageBackend, StorageOp, StorageStats, StoredItem};

#[cfg(feature = "aof")]
pub use persistence::AofBackend;

pub use loci_types::{
    ActivityType, ClassifierResults, Coordinate, ItemId, LocationFix, ModelId, MovingState,
    RadiusStats, RecordingState, SampleId, SampleSource,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for building against the engine.
pub mod prelude {
    pub use crate::{Config, Event, EventBus, LocoError, Result};

    pub use crate::{ActivityBrain, Engine, LocomotionManager, MergeEngine, PersistentProcessor, TimelineRecorder};
    pub use crate::manager::{LocationProvider, MotionProvider};

    pub use crate::{ItemKind, LocomotionSample, TimelineItem, TimelineStore};

    pub use crate::classifier::{CompositeClassifier, DiscreteClassifier, ModelProvider};

    pub use crate::storage::{MemoryBackend, StorageBackend};

    #[cfg(feature = "aof")]
    pub use crate::AofBackend;

    pub use crate::config::StoreConfig;

    pub use loci_types::{ActivityType, Coordinate, MovingState, RecordingState};
}
