//! In-flight control requests awaiting confirmation from the feed.
//!
//! A request registers what it expects to see for a run. The feed applier
//! calls [`PendingControls::confirm`] with every run it stores; a matching
//! run resolves the waiting caller. Callers that time out cancel their entry
//! so the pending flag never sticks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::engine::RunState;
use crate::error::{FlowError, FlowResult};
use crate::model::ExecutionRun;

/// What confirms a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The run reports this state, or any terminal state.
    State(RunState),
    /// The run exists in the store.
    Present,
}

impl Expectation {
    fn is_met_by(&self, run: &ExecutionRun) -> bool {
        match self {
            Expectation::State(state) => run.code_run_state == *state || run.code_run_state.is_terminal(),
            Expectation::Present => true,
        }
    }
}

struct PendingRequest {
    expectation: Expectation,
    sender: oneshot::Sender<RunState>,
    registered_at: Instant,
}

/// Pending control requests keyed by run id.
#[derive(Clone, Default)]
pub struct PendingControls {
    pending: Arc<RwLock<HashMap<Uuid, PendingRequest>>>,
}

impl PendingControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `run_id`. Only one request per run may be in
    /// flight.
    pub async fn register(&self, run_id: Uuid, expectation: Expectation) -> FlowResult<oneshot::Receiver<RunState>> {
        let mut pending = self.pending.write().await;
        if pending.contains_key(&run_id) {
            return Err(FlowError::Pending(run_id));
        }

        let (sender, receiver) = oneshot::channel();
        pending.insert(
            run_id,
            PendingRequest {
                expectation,
                sender,
                registered_at: Instant::now(),
            },
        );
        tracing::debug!(run_id = %run_id, expectation = ?expectation, "Registered pending control");
        Ok(receiver)
    }

    /// Resolve the request for `run` if the run satisfies it.
    pub async fn confirm(&self, run: &ExecutionRun) -> bool {
        let mut pending = self.pending.write().await;
        let met = pending
            .get(&run.id)
            .map(|request| request.expectation.is_met_by(run))
            .unwrap_or(false);
        if !met {
            return false;
        }

        let Some(request) = pending.remove(&run.id) else {
            return false;
        };
        let waited_ms = request.registered_at.elapsed().as_millis() as u64;
        match request.sender.send(run.code_run_state) {
            Ok(()) => {
                tracing::debug!(run_id = %run.id, state = %run.code_run_state, waited_ms, "Confirmed pending control");
                true
            }
            Err(_) => {
                tracing::warn!(run_id = %run.id, "Pending control receiver dropped");
                false
            }
        }
    }

    /// Drop the request for `run_id` (timeout or failed write).
    pub async fn cancel(&self, run_id: &Uuid) {
        if self.pending.write().await.remove(run_id).is_some() {
            tracing::debug!(run_id = %run_id, "Cancelled pending control");
        }
    }

    pub async fn is_pending(&self, run_id: &Uuid) -> bool {
        self.pending.read().await.contains_key(run_id)
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}
