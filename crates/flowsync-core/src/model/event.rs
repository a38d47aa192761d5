//! Run telemetry: coderun events and their browser sub-events.
//!
//! Both are append-only history records created by the execution backend.
//! Only the progress counters of a coderun event change after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Telemetry emitted while a function step executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoderunEvent {
    /// Event identifier.
    pub id: Uuid,

    /// Run this event belongs to.
    pub run_id: Uuid,

    /// Function step that produced the event.
    pub function_name: String,

    /// Completed units of work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_progress: Option<u32>,

    /// Total units of work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_total: Option<u32>,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

/// Browser activity recorded under a coderun event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEvent {
    /// Event identifier.
    pub id: Uuid,

    /// Parent coderun event.
    pub coderun_event_id: Uuid,

    /// Function step that produced the event.
    pub function_name: String,

    /// Page URL at the time of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl CoderunEvent {
    /// Create an event with no progress or payload.
    pub fn new(run_id: Uuid, function_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            function_name: function_name.to_string(),
            n_progress: None,
            n_total: None,
            data: None,
            created_at: Utc::now(),
        }
    }
}

impl BrowserEvent {
    /// Create a browser event under `coderun_event_id`.
    pub fn new(coderun_event_id: Uuid, function_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            coderun_event_id,
            function_name: function_name.to_string(),
            url: None,
            data: None,
            created_at: Utc::now(),
        }
    }
}
