//! Error types for the fleet update orchestrator.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A knob combination or value rejected before a strategy is built.
    #[error("planning error: {0}")]
    Planning(String),

    /// An invalid configuration value was supplied.
    #[error("configuration error: {0}")]
    Config(String),

    /// The platform driver reported a failed or timed-out operation.
    #[error("driver error: {0}")]
    Driver(String),

    /// An entity (host/instance) referenced by a step vanished or moved.
    #[error("inventory error: {0}")]
    Inventory(String),

    /// Failed to serialize or deserialize persisted strategy state.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The requested action conflicts with the strategy's current state,
    /// or a strategy of this kind already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The named strategy kind has no active strategy.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
