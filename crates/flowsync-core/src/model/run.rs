//! Execution run model: one invocation of a session's program.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::session::ExecutionSession;
use super::step::StepRecord;
use crate::engine::RunState;

/// A live or completed run.
///
/// `steps` is the run's own copy of the program, updated in place by the
/// execution backend. It never aliases the session's static program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// Run identifier.
    pub id: Uuid,

    /// Session this run was started from.
    pub session_id: Uuid,

    /// Lifecycle state.
    #[serde(default)]
    pub code_run_state: RunState,

    /// Live step array.
    #[serde(default)]
    pub steps: Vec<StepRecord>,

    /// Error text reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Final output payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Input values used for this run.
    #[serde(default)]
    pub user_inputs: BTreeMap<String, Value>,

    /// Monetary cost of this run.
    #[serde(default)]
    pub cost: f64,

    /// When the run was created.
    pub created_at: DateTime<Utc>,
}

impl ExecutionRun {
    /// Start a new run from a session.
    ///
    /// The program and inputs are copied; later edits to the session do not
    /// reach the run and backend updates to the run do not reach the session.
    pub fn start(session: &ExecutionSession) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session.id,
            code_run_state: RunState::Running,
            steps: session.steps.clone(),
            error: None,
            output: None,
            user_inputs: session.user_inputs.clone(),
            cost: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Whether the run has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.code_run_state.is_terminal()
    }

    /// Currently executing step, if any.
    pub fn active_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.active)
    }
}
