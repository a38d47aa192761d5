//! Normalized entity store.
//!
//! - **Table**: one entity kind with child links and orphan parking
//! - **Normalized**: the linked tables and feed application
//! - **Snapshot**: read-model access and snapshot scopes

mod normalized;
mod snapshot;
mod table;

pub use normalized::{ApplyOutcome, NormalizedStore, SnapshotMark};
pub use snapshot::{fetch_snapshot, ReadModel, RunEvents, Snapshot, SnapshotFilter};
pub use table::{Entity, Row, Table};
