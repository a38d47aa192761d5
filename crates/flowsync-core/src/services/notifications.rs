//! Dismissible user-facing notifications.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
    /// Whether retrying the failed action may help.
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
}

/// Bounded queue; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct Notifications {
    capacity: usize,
    queue: VecDeque<Notification>,
}

impl Notifications {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, kind: NotificationKind, message: impl Into<String>) -> Uuid {
        self.push_entry(kind, message.into(), false)
    }

    /// Queue an error for the user.
    pub fn push_error(&mut self, err: &FlowError) -> Uuid {
        self.push_entry(NotificationKind::Error, err.to_string(), err.is_retryable())
    }

    fn push_entry(&mut self, kind: NotificationKind, message: String, retryable: bool) -> Uuid {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        let id = Uuid::new_v4();
        self.queue.push_back(Notification {
            id,
            message,
            kind,
            retryable,
            created_at: Utc::now(),
        });
        id
    }

    /// Returns `false` if `id` was not queued.
    pub fn dismiss(&mut self, id: &Uuid) -> bool {
        let before = self.queue.len();
        self.queue.retain(|n| n.id != *id);
        self.queue.len() != before
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<Notification> {
        self.queue.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
