//! Adapter errors and their mapping onto [`FlowError`].

use flowsync_core::FlowError;
use thiserror::Error;

/// Errors raised by the NATS and HTTP adapters.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("NATS connection error: {0}")]
    Connection(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// Whether a write should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            RemoteError::Http { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Connection(_) | RemoteError::Publish(_) => true,
            RemoteError::Subscribe(_) | RemoteError::InvalidUrl(_) => false,
        }
    }
}

impl From<RemoteError> for FlowError {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::Connection(_) | RemoteError::Subscribe(_) | RemoteError::Publish(_) => FlowError::Nats(message),
            RemoteError::Http { status: 404, .. } => FlowError::NotFound(message),
            RemoteError::Http { .. } | RemoteError::Request(_) => FlowError::Transport(message),
            RemoteError::InvalidUrl(_) => FlowError::Config(message),
        }
    }
}
