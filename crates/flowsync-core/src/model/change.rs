//! Change feed wire format.
//!
//! Messages look like `{"eventType": "insert", "entity": {"table": "run", "record": {...}}}`.
//! Deletes carry only the table and id: `{"eventType": "delete", "entity": {"table": "run", "id": "..."}}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BrowserEvent, CoderunEvent, ExecutionRun, ExecutionSession};

/// Entity table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Session,
    Run,
    CoderunEvent,
    BrowserEvent,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Session => "session",
            EntityKind::Run => "run",
            EntityKind::CoderunEvent => "coderun_event",
            EntityKind::BrowserEvent => "browser_event",
        };
        write!(f, "{}", s)
    }
}

/// A full entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum EntityRecord {
    Session(ExecutionSession),
    Run(ExecutionRun),
    CoderunEvent(CoderunEvent),
    BrowserEvent(BrowserEvent),
}

impl EntityRecord {
    /// Table this record belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Session(_) => EntityKind::Session,
            EntityRecord::Run(_) => EntityKind::Run,
            EntityRecord::CoderunEvent(_) => EntityKind::CoderunEvent,
            EntityRecord::BrowserEvent(_) => EntityKind::BrowserEvent,
        }
    }

    /// Row identifier.
    pub fn id(&self) -> Uuid {
        match self {
            EntityRecord::Session(s) => s.id,
            EntityRecord::Run(r) => r.id,
            EntityRecord::CoderunEvent(e) => e.id,
            EntityRecord::BrowserEvent(e) => e.id,
        }
    }

    /// Reference to this row.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            table: self.kind(),
            id: self.id(),
        }
    }
}

/// Table and id of a row; the payload of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub table: EntityKind,
    pub id: Uuid,
}

/// Change feed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// One message from the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum ChangeMessage {
    Insert { entity: EntityRecord },
    Update { entity: EntityRecord },
    Delete { entity: EntityRef },
}

impl ChangeMessage {
    /// Operation kind.
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeMessage::Insert { .. } => ChangeKind::Insert,
            ChangeMessage::Update { .. } => ChangeKind::Update,
            ChangeMessage::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The row this message is about.
    pub fn target(&self) -> EntityRef {
        match self {
            ChangeMessage::Insert { entity } | ChangeMessage::Update { entity } => entity.entity_ref(),
            ChangeMessage::Delete { entity } => *entity,
        }
    }
}
