//! Normalized entity store kept consistent with the change feed.
//!
//! Four tables linked parent to child: session ← run ← coderun event ←
//! browser event. All operations are synchronous and run to completion, so
//! a caller that serializes access (the sync service holds a write lock per
//! apply) gets event-loop semantics.
//!
//! Snapshots are fetched without the lock held, so a snapshot row can be
//! older than a feed write that landed during the fetch. [`SnapshotMark`]
//! records the store generation before the fetch; rows the feed wrote after
//! it are left alone when the snapshot is applied.

use std::collections::HashMap;

use uuid::Uuid;

use super::snapshot::Snapshot;
use super::table::{Entity, Table};
use crate::engine::RunState;
use crate::model::{
    BrowserEvent, ChangeMessage, CoderunEvent, EntityKind, EntityRecord, EntityRef, ExecutionRun,
    ExecutionSession,
};

/// Result of applying one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new row was added.
    Inserted,
    /// Insert for an id already present; dropped.
    Duplicate,
    /// An existing row was replaced.
    Updated,
    /// A row was removed.
    Deleted,
    /// Delete for an unknown id.
    Missing,
}

/// Store generation taken by [`NormalizedStore::begin_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "pass the mark to apply_snapshot or abandon_snapshot"]
pub struct SnapshotMark {
    generation: u64,
}

/// In-memory maps of sessions, runs and run telemetry.
#[derive(Debug, Clone, Default)]
pub struct NormalizedStore {
    sessions: Table<ExecutionSession>,
    runs: Table<ExecutionRun>,
    coderun_events: Table<CoderunEvent>,
    browser_events: Table<BrowserEvent>,
    /// Bumped by every change applied outside a snapshot.
    generation: u64,
    snapshots_in_flight: usize,
    /// Generation of the last change per entity. Only kept while a snapshot
    /// is in flight.
    written: HashMap<EntityRef, u64>,
}

impl NormalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one feed message.
    pub fn apply(&mut self, message: ChangeMessage) -> ApplyOutcome {
        match message {
            ChangeMessage::Insert { entity } => self.apply_insert(entity),
            ChangeMessage::Update { entity } => self.apply_update(entity),
            ChangeMessage::Delete { entity } => self.apply_delete(entity),
        }
    }

    /// Add an entity unless its id is already present.
    pub fn apply_insert(&mut self, entity: EntityRecord) -> ApplyOutcome {
        self.touch(entity.entity_ref());
        match entity {
            EntityRecord::Session(session) => {
                if self.sessions.insert(session) {
                    ApplyOutcome::Inserted
                } else {
                    ApplyOutcome::Duplicate
                }
            }
            EntityRecord::Run(run) => insert_linked(&mut self.runs, &mut self.sessions, run),
            EntityRecord::CoderunEvent(event) => {
                insert_linked(&mut self.coderun_events, &mut self.runs, event)
            }
            EntityRecord::BrowserEvent(event) => {
                insert_linked(&mut self.browser_events, &mut self.coderun_events, event)
            }
        }
    }

    /// Replace an entity's fields, keeping locally derived children.
    ///
    /// Unknown ids are inserted. Backend-reported run states are accepted
    /// even when they contradict the lifecycle table; the anomaly is logged.
    pub fn apply_update(&mut self, entity: EntityRecord) -> ApplyOutcome {
        self.touch(entity.entity_ref());
        self.upsert(entity)
    }

    fn upsert(&mut self, entity: EntityRecord) -> ApplyOutcome {
        match entity {
            EntityRecord::Session(session) => match self.sessions.replace(session) {
                Some(_) => ApplyOutcome::Updated,
                None => ApplyOutcome::Inserted,
            },
            EntityRecord::Run(run) => {
                let run_id = run.id;
                let next_state = run.code_run_state;
                let (outcome, previous) = update_linked(&mut self.runs, &mut self.sessions, run);
                if let Some(previous) = previous {
                    let from = previous.code_run_state;
                    if from.is_anomalous_backend_transition(next_state) {
                        tracing::warn!(
                            run_id = %run_id,
                            from = %from,
                            to = %next_state,
                            "Backend reported a transition out of a terminal state"
                        );
                    }
                }
                outcome
            }
            EntityRecord::CoderunEvent(event) => {
                update_linked(&mut self.coderun_events, &mut self.runs, event).0
            }
            EntityRecord::BrowserEvent(event) => {
                update_linked(&mut self.browser_events, &mut self.coderun_events, event).0
            }
        }
    }

    /// Remove an entity and detach it from its parent. Children are kept.
    pub fn apply_delete(&mut self, target: EntityRef) -> ApplyOutcome {
        self.touch(target);
        let id = target.id;
        match target.table {
            EntityKind::Session => match self.sessions.remove(&id) {
                Some(_) => ApplyOutcome::Deleted,
                None => ApplyOutcome::Missing,
            },
            EntityKind::Run => delete_linked(&mut self.runs, &mut self.sessions, &id),
            EntityKind::CoderunEvent => {
                delete_linked(&mut self.coderun_events, &mut self.runs, &id)
            }
            EntityKind::BrowserEvent => {
                delete_linked(&mut self.browser_events, &mut self.coderun_events, &id)
            }
        }
    }

    /// Move a live run to `window_closed`, leaving every other field as is.
    ///
    /// Returns the state the run left, or `None` when the run is unknown or
    /// already finished.
    pub fn close_run_window(&mut self, run_id: &Uuid) -> Option<RunState> {
        let run = self.runs.get_mut(run_id)?;
        if run.is_finished() {
            return None;
        }
        let from = std::mem::replace(&mut run.code_run_state, RunState::WindowClosed);
        self.touch(EntityRef {
            table: EntityKind::Run,
            id: *run_id,
        });
        Some(from)
    }

    /// Take a mark before fetching a snapshot.
    pub fn begin_snapshot(&mut self) -> SnapshotMark {
        self.snapshots_in_flight += 1;
        SnapshotMark {
            generation: self.generation,
        }
    }

    /// Seed or refresh the store from a snapshot fetched after `mark`.
    ///
    /// Every entity is upserted, parents first, so repeated loads of the same
    /// snapshot leave the store unchanged. Entities missing from the snapshot
    /// are kept, and entities changed since `mark` keep their newer row.
    /// Returns the number of rows applied.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, mark: SnapshotMark) -> usize {
        let records = snapshot
            .sessions
            .into_iter()
            .map(EntityRecord::Session)
            .chain(snapshot.runs.into_iter().map(EntityRecord::Run))
            .chain(snapshot.coderun_events.into_iter().map(EntityRecord::CoderunEvent))
            .chain(snapshot.browser_events.into_iter().map(EntityRecord::BrowserEvent));

        let mut applied = 0;
        for record in records {
            let target = record.entity_ref();
            if self.written_since(target, mark) {
                tracing::debug!(
                    table = %target.table,
                    id = %target.id,
                    "Row changed during snapshot fetch, keeping the newer one"
                );
                continue;
            }
            self.upsert(record);
            applied += 1;
        }
        self.end_snapshot();
        applied
    }

    /// Release a mark whose snapshot fetch failed.
    pub fn abandon_snapshot(&mut self, _mark: SnapshotMark) {
        self.end_snapshot();
    }

    fn touch(&mut self, target: EntityRef) {
        self.generation += 1;
        if self.snapshots_in_flight > 0 {
            self.written.insert(target, self.generation);
        }
    }

    fn written_since(&self, target: EntityRef, mark: SnapshotMark) -> bool {
        self.written
            .get(&target)
            .is_some_and(|generation| *generation > mark.generation)
    }

    fn end_snapshot(&mut self) {
        self.snapshots_in_flight = self.snapshots_in_flight.saturating_sub(1);
        if self.snapshots_in_flight == 0 {
            self.written.clear();
        }
    }

    pub fn session(&self, id: &Uuid) -> Option<&ExecutionSession> {
        self.sessions.get(id)
    }

    pub fn run(&self, id: &Uuid) -> Option<&ExecutionRun> {
        self.runs.get(id)
    }

    pub fn coderun_event(&self, id: &Uuid) -> Option<&CoderunEvent> {
        self.coderun_events.get(id)
    }

    pub fn browser_event(&self, id: &Uuid) -> Option<&BrowserEvent> {
        self.browser_events.get(id)
    }

    /// All sessions, newest first.
    pub fn sessions(&self) -> Vec<&ExecutionSession> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Runs of a session in link order.
    pub fn runs_for_session(&self, session_id: &Uuid) -> Vec<&ExecutionRun> {
        resolve(&self.runs, self.sessions.children(session_id))
    }

    /// Coderun events of a run in link order.
    pub fn events_for_run(&self, run_id: &Uuid) -> Vec<&CoderunEvent> {
        resolve(&self.coderun_events, self.runs.children(run_id))
    }

    /// Coderun events produced by one function step of a run.
    pub fn events_for_step(&self, run_id: &Uuid, function_name: &str) -> Vec<&CoderunEvent> {
        self.events_for_run(run_id)
            .into_iter()
            .filter(|e| e.function_name == function_name)
            .collect()
    }

    /// Browser events of a coderun event in link order.
    pub fn browser_events_for(&self, coderun_event_id: &Uuid) -> Vec<&BrowserEvent> {
        resolve(&self.browser_events, self.coderun_events.children(coderun_event_id))
    }

    /// Child ids linked under an entity.
    pub fn child_ids(&self, parent: EntityRef) -> &[Uuid] {
        match parent.table {
            EntityKind::Session => self.sessions.children(&parent.id),
            EntityKind::Run => self.runs.children(&parent.id),
            EntityKind::CoderunEvent => self.coderun_events.children(&parent.id),
            EntityKind::BrowserEvent => &[],
        }
    }

    /// Children still waiting for their parent across all tables.
    pub fn orphan_count(&self) -> usize {
        self.sessions.orphan_count() + self.runs.orphan_count() + self.coderun_events.orphan_count()
    }

    /// Number of rows per table: sessions, runs, coderun events, browser events.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.sessions.len(),
            self.runs.len(),
            self.coderun_events.len(),
            self.browser_events.len(),
        )
    }
}

fn resolve<'a, E: Entity>(table: &'a Table<E>, ids: &[Uuid]) -> Vec<&'a E> {
    ids.iter().filter_map(|id| table.get(id)).collect()
}

fn insert_linked<C: Entity, P: Entity>(
    table: &mut Table<C>,
    parents: &mut Table<P>,
    entity: C,
) -> ApplyOutcome {
    let id = entity.id();
    let parent = entity.parent_id();
    if !table.insert(entity) {
        tracing::trace!(table = %C::KIND, id = %id, "Duplicate insert dropped");
        return ApplyOutcome::Duplicate;
    }
    if let Some(parent) = parent {
        parents.adopt(parent, id);
    }
    ApplyOutcome::Inserted
}

fn update_linked<C: Entity, P: Entity>(
    table: &mut Table<C>,
    parents: &mut Table<P>,
    entity: C,
) -> (ApplyOutcome, Option<C>) {
    let id = entity.id();
    let parent = entity.parent_id();
    match table.replace(entity) {
        Some(previous) => {
            let old_parent = previous.parent_id();
            if old_parent != parent {
                if let Some(old_parent) = old_parent {
                    parents.disown(old_parent, id);
                }
                if let Some(parent) = parent {
                    parents.adopt(parent, id);
                }
            }
            (ApplyOutcome::Updated, Some(previous))
        }
        None => {
            if let Some(parent) = parent {
                parents.adopt(parent, id);
            }
            (ApplyOutcome::Inserted, None)
        }
    }
}

fn delete_linked<C: Entity, P: Entity>(
    table: &mut Table<C>,
    parents: &mut Table<P>,
    id: &Uuid,
) -> ApplyOutcome {
    match table.remove(id) {
        Some(previous) => {
            if let Some(parent) = previous.parent_id() {
                parents.disown(parent, *id);
            }
            ApplyOutcome::Deleted
        }
        None => ApplyOutcome::Missing,
    }
}
