//! Crate-wide error type.
//!
//! One `thiserror`-derived enum,
//! one `Result` alias. Invariant violations (double ownership, link-list
//! cycles, merging a deleted item) are deliberately *not* variants here --
//! per the design's error policy they are bugs, not runtime conditions, and
//! are enforced with `assert!`/`debug_assert!` at the point of violation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocoError {
    #[error("location permission not granted")]
    PermissionDenied,

    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("no location data available")]
    NoLocationData,

    #[error("classifier model for geo key {0} is stale")]
    StaleModel(String),

    #[error("failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("item {0} is merge-locked")]
    MergeLocked(String),

    #[error("transient persistence error: {0}")]
    PersistenceTransient(String),

    #[error("fatal persistence error: {0}")]
    PersistenceFatal(String),

    #[error("no classifier available for this coordinate")]
    ClassifierUnavailable,

    #[error("operation timed out")]
    Timeout,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("engine queue unavailable: {0}")]
    EngineUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LocoError {
    /// Whether a caller should retry the operation that produced this error.
    /// Used by the store-write queue's bounded-exponential retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocoError::PersistenceTransient(_))
    }

    /// Whether this error represents the pipeline staying in its current
    /// state and continuing with the next tick, vs. surfacing to the caller.
    pub fn is_recoverable_locally(&self) -> bool {
        matches!(
            self,
            LocoError::PermissionDenied
                | LocoError::SensorUnavailable(_)
                | LocoError::NoLocationData
        )
    }
}

pub type Result<T> = std::result::Result<T, LocoError>;
