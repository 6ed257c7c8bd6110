//! # loci-types
//!
//! Core location, activity, and identifier types shared by the Loci timeline
//! engine and anything built on top of it (UI layers, importers, model
//! trainers). These are plain data types: geometry, enums, identifiers. The
//! business rules that operate on them (validity, merging, classification)
//! live in the `loci` crate itself.
//!
//! All types are serializable with Serde and built on top of the `geo`
//! crate's geometric primitives, mirroring how `spatio-types` underlies
//! `spatio`.

pub mod activity;
pub mod coordinate;
pub mod ids;
pub mod motion;

pub use activity::{ActivityType, ClassifierResults};
pub use coordinate::{Coordinate, RadiusStats};
pub use ids::{ItemId, ModelId, SampleId};
pub use motion::{LocationFix, MovingState, RecordingState, SampleSource};
