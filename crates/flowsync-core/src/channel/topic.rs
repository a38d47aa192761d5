//! Logical feed topics.

use std::fmt;

use uuid::Uuid;

use crate::store::SnapshotFilter;

/// One live feed of change messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Session table changes
    Sessions,
    /// Run changes for one session
    SessionRuns(Uuid),
    /// Changes to a single run row
    Run(Uuid),
    /// Coderun and browser events of one run
    RunEvents(Uuid),
}

impl Topic {
    /// Feed subject relative to the configured prefix.
    pub fn subject(&self) -> String {
        match self {
            Topic::Sessions => "sessions".to_string(),
            Topic::SessionRuns(id) => format!("sessions.{}.runs", id),
            Topic::Run(id) => format!("runs.{}", id),
            Topic::RunEvents(id) => format!("runs.{}.events", id),
        }
    }

    /// Topics needed to keep a snapshot of `filter` live.
    pub fn for_filter(filter: SnapshotFilter) -> Vec<Topic> {
        match filter {
            SnapshotFilter::Sessions => vec![Topic::Sessions],
            SnapshotFilter::Session(id) => vec![Topic::Sessions, Topic::SessionRuns(id)],
            SnapshotFilter::Run(id) => vec![Topic::Run(id), Topic::RunEvents(id)],
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject())
    }
}
