//! Snapshot loading from the remote read model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowResult;
use crate::model::{BrowserEvent, CoderunEvent, ExecutionRun, ExecutionSession};

/// Portion of the store a snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SnapshotFilter {
    /// Every session visible to the user.
    Sessions,
    /// One session and its runs.
    Session(Uuid),
    /// One run with its coderun and browser events.
    Run(Uuid),
}

impl std::fmt::Display for SnapshotFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotFilter::Sessions => write!(f, "sessions"),
            SnapshotFilter::Session(id) => write!(f, "session:{}", id),
            SnapshotFilter::Run(id) => write!(f, "run:{}", id),
        }
    }
}

/// Rows returned by a snapshot fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub sessions: Vec<ExecutionSession>,
    #[serde(default)]
    pub runs: Vec<ExecutionRun>,
    #[serde(default)]
    pub coderun_events: Vec<CoderunEvent>,
    #[serde(default)]
    pub browser_events: Vec<BrowserEvent>,
}

impl Snapshot {
    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.sessions.len() + self.runs.len() + self.coderun_events.len() + self.browser_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run telemetry as returned by the read model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunEvents {
    #[serde(default)]
    pub coderun_events: Vec<CoderunEvent>,
    #[serde(default)]
    pub browser_events: Vec<BrowserEvent>,
}

/// Read access to the external session/run store.
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// All sessions visible to the user.
    async fn fetch_sessions(&self) -> FlowResult<Vec<ExecutionSession>>;

    /// One session, or `None` if it does not exist.
    async fn fetch_session(&self, session_id: Uuid) -> FlowResult<Option<ExecutionSession>>;

    /// Runs started from a session.
    async fn fetch_session_runs(&self, session_id: Uuid) -> FlowResult<Vec<ExecutionRun>>;

    /// One run, or `None` if it does not exist.
    async fn fetch_run(&self, run_id: Uuid) -> FlowResult<Option<ExecutionRun>>;

    /// Coderun and browser events of a run.
    async fn fetch_run_events(&self, run_id: Uuid) -> FlowResult<RunEvents>;
}

/// Fetch the rows covered by `filter`.
pub async fn fetch_snapshot(read_model: &dyn ReadModel, filter: SnapshotFilter) -> FlowResult<Snapshot> {
    let mut snapshot = Snapshot::default();

    match filter {
        SnapshotFilter::Sessions => {
            snapshot.sessions = read_model.fetch_sessions().await?;
        }
        SnapshotFilter::Session(session_id) => {
            snapshot.sessions.extend(read_model.fetch_session(session_id).await?);
            snapshot.runs = read_model.fetch_session_runs(session_id).await?;
        }
        SnapshotFilter::Run(run_id) => {
            snapshot.runs.extend(read_model.fetch_run(run_id).await?);
            let events = read_model.fetch_run_events(run_id).await?;
            snapshot.coderun_events = events.coderun_events;
            snapshot.browser_events = events.browser_events;
        }
    }

    tracing::debug!(filter = %filter, rows = snapshot.len(), "Snapshot fetched");
    Ok(snapshot)
}
