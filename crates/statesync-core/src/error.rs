//! Error types for the reconciliation engine.

use statesync_common::StoreError;
use thiserror::Error;

/// Errors from engine and lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Staged store operation failed.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// The external source adapter failed.
    #[error("source adapter error: {0}")]
    Source(String),

    /// Downstream publication failed for a single key.
    #[error("publish failed for {key}: {reason}")]
    Publish { key: String, reason: String },

    /// The pre-restart published state could not be loaded at startup.
    ///
    /// This is fatal: assuming an empty shadow on a warm restart would
    /// trigger mass spurious deletes downstream.
    #[error("{app}: cannot load pre-restart state: {reason}")]
    StartupStateUnavailable { app: String, reason: String },
}

impl EngineError {
    /// Creates a source adapter error.
    pub fn source(reason: impl Into<String>) -> Self {
        EngineError::Source(reason.into())
    }

    /// Creates a per-key publish error.
    pub fn publish(key: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Publish {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
