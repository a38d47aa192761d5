//! Latest progress frame per watched run.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One screenshot received from the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded image as sent on the wire.
    pub image: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ScreenshotCache {
    watched: HashSet<Uuid>,
    frames: HashMap<Uuid, Frame>,
}

impl ScreenshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the run was already watched.
    pub fn watch(&mut self, run_id: Uuid) -> bool {
        self.watched.insert(run_id)
    }

    pub fn unwatch(&mut self, run_id: &Uuid) {
        self.watched.remove(run_id);
        self.frames.remove(run_id);
    }

    pub fn is_watched(&self, run_id: &Uuid) -> bool {
        self.watched.contains(run_id)
    }

    pub fn watched(&self) -> Vec<Uuid> {
        self.watched.iter().copied().collect()
    }

    /// Store a frame. Frames for runs nobody watches are dropped.
    pub fn accept(&mut self, run_id: Uuid, image: String) -> bool {
        if !self.watched.contains(&run_id) {
            return false;
        }
        self.frames.insert(
            run_id,
            Frame {
                image,
                received_at: Utc::now(),
            },
        );
        true
    }

    pub fn latest(&self, run_id: &Uuid) -> Option<&Frame> {
        self.frames.get(run_id)
    }
}
