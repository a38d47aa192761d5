//! Runtime configuration for flowsync.

use std::time::Duration;

use serde::Deserialize;

/// Configuration loaded from environment variables.
///
/// Environment variables are prefixed with `FLOWSYNC_`:
/// - `FLOWSYNC_READ_MODEL_URL`: Base URL of the session/run read model
/// - `FLOWSYNC_NATS_URL`: NATS server for the change feed and control bus
/// - `FLOWSYNC_FEED_SUBJECT_PREFIX`: Subject prefix of change feed topics
/// - `FLOWSYNC_CONTROL_SUBJECT`: Subject prefix of the control bus
/// - `FLOWSYNC_HIGHLIGHT_TTL_MS`: How long changed steps stay highlighted
/// - `FLOWSYNC_CONTROL_TIMEOUT_SECS`: Window for pause/resume/abort confirmation
/// - `FLOWSYNC_CONNECT_TIMEOUT_SECS`: Window for a started run to appear
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Read model base URL
    #[serde(default = "default_read_model_url")]
    pub read_model_url: String,

    /// NATS URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Change feed subject prefix
    #[serde(default = "default_feed_subject_prefix")]
    pub feed_subject_prefix: String,

    /// Control bus subject prefix
    #[serde(default = "default_control_subject")]
    pub control_subject: String,

    /// Per-topic broadcast buffer
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,

    /// Highlight duration in milliseconds
    #[serde(default = "default_highlight_ttl_ms")]
    pub highlight_ttl_ms: u64,

    /// Control confirmation window in seconds
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,

    /// Run start confirmation window in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Screenshot polling interval in milliseconds
    #[serde(default = "default_screenshot_interval_ms")]
    pub screenshot_interval_ms: u64,

    /// Maximum queued notifications
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Retries for run store writes
    #[serde(default = "default_write_max_retries")]
    pub write_max_retries: u32,
}

fn default_read_model_url() -> String {
    "http://localhost:8090/api".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_feed_subject_prefix() -> String {
    "flowsync.changes".to_string()
}

fn default_control_subject() -> String {
    "flowsync.control".to_string()
}

fn default_feed_buffer() -> usize {
    256
}

fn default_highlight_ttl_ms() -> u64 {
    1500
}

fn default_control_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    120
}

fn default_screenshot_interval_ms() -> u64 {
    1000
}

fn default_notification_capacity() -> usize {
    32
}

fn default_http_timeout() -> u64 {
    30
}

fn default_write_max_retries() -> u32 {
    3
}

impl FlowConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `FLOWSYNC_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("FLOWSYNC_").from_env::<FlowConfig>()
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, envy::Error> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_env()
    }

    pub fn highlight_ttl(&self) -> Duration {
        Duration::from_millis(self.highlight_ttl_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_millis(self.screenshot_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            read_model_url: default_read_model_url(),
            nats_url: default_nats_url(),
            feed_subject_prefix: default_feed_subject_prefix(),
            control_subject: default_control_subject(),
            feed_buffer: default_feed_buffer(),
            highlight_ttl_ms: default_highlight_ttl_ms(),
            control_timeout_secs: default_control_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            screenshot_interval_ms: default_screenshot_interval_ms(),
            notification_capacity: default_notification_capacity(),
            http_timeout_secs: default_http_timeout(),
            write_max_retries: default_write_max_retries(),
        }
    }
}
