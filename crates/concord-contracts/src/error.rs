//! Error types for the CONCORD coordination bus.
//!
//! All fallible operations return `CoordResult<T>`. Delivery problems are
//! mostly handled inside the bus (retries, events); the variants here are
//! what reaches a caller.

use thiserror::Error;

/// The unified error type for the CONCORD crates.
#[derive(Debug, Error)]
pub enum CoordError {
    /// A required envelope field was missing or empty. Nothing was queued.
    #[error("message validation failed: missing required field '{field}'")]
    Validation { field: String },

    /// A message with this id is already known to the bus.
    #[error("duplicate message id '{message_id}'")]
    DuplicateMessage { message_id: String },

    /// The transport could not reach the target agent.
    #[error("delivery to agent '{agent_id}' failed: {reason}")]
    DeliveryFailed { agent_id: String, reason: String },

    /// An agent restart was requested and did not succeed.
    #[error("restart of agent '{agent_id}' failed: {reason}")]
    RestartFailed { agent_id: String, reason: String },

    /// The bus has been shut down and accepts no more work.
    #[error("coordination bus is shut down")]
    ShutDown,

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A lock guarding shared bus state was poisoned by a panicking thread.
    #[error("bus state unavailable: {reason}")]
    StatePoisoned { reason: String },
}

impl CoordError {
    pub fn validation(field: impl Into<String>) -> Self {
        CoordError::Validation {
            field: field.into(),
        }
    }
}

/// Convenience alias used throughout the CONCORD crates.
pub type CoordResult<T> = Result<T, CoordError>;
