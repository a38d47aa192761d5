//! Error types for flowsync.
//!
//! None of these errors is fatal: every variant leaves the store in a
//! structurally valid state and is surfaced to the user as a dismissible
//! notification.

use thiserror::Error;
use uuid::Uuid;

use crate::engine::RunState;

/// Library-level errors.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Feed or read-model transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Control request not in the transition table
    #[error("Transition rejected: {from} -> {to}")]
    TransitionRejected { from: RunState, to: RunState },

    /// No confirming update within the window
    #[error("Timed out waiting for {operation} on run {run_id}")]
    Timeout { operation: String, run_id: Uuid },

    /// Another request for the same run is still in flight
    #[error("Request already pending for run {0}")]
    Pending(Uuid),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// NATS messaging error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Transport(_) | FlowError::Timeout { .. } | FlowError::Nats(_) | FlowError::Pending(_)
        )
    }
}

/// Result type alias using FlowError.
pub type FlowResult<T> = Result<T, FlowError>;

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Internal(err.to_string())
    }
}

impl From<envy::Error> for FlowError {
    fn from(err: envy::Error) -> Self {
        FlowError::Config(err.to_string())
    }
}
