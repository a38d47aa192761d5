//! Execution-control boundary.
//!
//! Outbound control messages go through a [`ControlTransport`]; run rows are
//! written through a [`RunWriter`]. Neither call is trusted as confirmation:
//! a request only completes when the change feed reports the new state.

mod message;
mod pending;
mod screenshots;

pub use message::ControlMessage;
pub use pending::{Expectation, PendingControls};
pub use screenshots::{Frame, ScreenshotCache};

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::RunState;
use crate::error::FlowResult;
use crate::model::ExecutionRun;

/// Carries outbound messages to the run executor.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn send(&self, message: &ControlMessage) -> FlowResult<()>;
}

/// Writes to the external run store.
#[async_trait]
pub trait RunWriter: Send + Sync {
    /// Persist a freshly started run.
    async fn create_run(&self, run: &ExecutionRun) -> FlowResult<()>;

    /// Request a new lifecycle state for a run.
    async fn update_run_state(&self, run_id: Uuid, state: RunState) -> FlowResult<()>;
}
