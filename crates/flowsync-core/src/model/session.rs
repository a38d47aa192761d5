//! Execution session model: a persistent workflow definition.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::step::StepRecord;

/// Authoring status derived from `requires_rewrite` and `approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStatus {
    /// The agent has not decided whether the program needs a rewrite.
    Thinking,
    /// A rewrite is in progress and has not been approved.
    Rewriting,
    /// The program can be run.
    Ready,
}

impl std::fmt::Display for RewriteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thinking => write!(f, "thinking"),
            Self::Rewriting => write!(f, "rewriting"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// A workflow definition owned by its creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSession {
    /// Session identifier.
    pub id: Uuid,

    /// Display title.
    #[serde(default)]
    pub title: String,

    /// The static program.
    #[serde(default)]
    pub steps: Vec<StepRecord>,

    /// Required external-app identifiers.
    #[serde(default)]
    pub apps: Vec<String>,

    /// `None` while the authoring agent is still deciding.
    #[serde(default)]
    pub requires_rewrite: Option<bool>,

    /// Set once a rewrite has been accepted.
    #[serde(default)]
    pub approved: bool,

    /// Named user-supplied input values.
    #[serde(default)]
    pub user_inputs: BTreeMap<String, Value>,

    /// Accumulated monetary cost.
    #[serde(default)]
    pub cost: f64,

    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl ExecutionSession {
    /// Create an empty session.
    pub fn new(id: Uuid, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            steps: Vec::new(),
            apps: Vec::new(),
            requires_rewrite: None,
            approved: false,
            user_inputs: BTreeMap::new(),
            cost: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Derived authoring status.
    pub fn rewrite_status(&self) -> RewriteStatus {
        match (self.requires_rewrite, self.approved) {
            (None, _) => RewriteStatus::Thinking,
            (Some(true), false) => RewriteStatus::Rewriting,
            _ => RewriteStatus::Ready,
        }
    }

    /// Required apps with duplicates removed.
    pub fn required_apps(&self) -> BTreeSet<&str> {
        self.apps.iter().map(String::as_str).collect()
    }
}
