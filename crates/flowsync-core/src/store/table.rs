//! A single entity table with derived child links.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{BrowserEvent, CoderunEvent, EntityKind, ExecutionRun, ExecutionSession};

/// An entity stored in a [`Table`].
pub trait Entity: Clone {
    /// Table name.
    const KIND: EntityKind;

    /// Row identifier.
    fn id(&self) -> Uuid;

    /// Identifier of the parent row, if the entity has one.
    fn parent_id(&self) -> Option<Uuid>;
}

impl Entity for ExecutionSession {
    const KIND: EntityKind = EntityKind::Session;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        None
    }
}

impl Entity for ExecutionRun {
    const KIND: EntityKind = EntityKind::Run;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.session_id)
    }
}

impl Entity for CoderunEvent {
    const KIND: EntityKind = EntityKind::CoderunEvent;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.run_id)
    }
}

impl Entity for BrowserEvent {
    const KIND: EntityKind = EntityKind::BrowserEvent;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.coderun_event_id)
    }
}

/// A stored entity and the ids of its known children.
#[derive(Debug, Clone)]
pub struct Row<E> {
    pub entity: E,
    pub children: Vec<Uuid>,
}

/// Entities of one kind keyed by id.
///
/// Children that arrive before their parent are parked in `waiting` under the
/// parent's id and moved onto the row when the parent is inserted.
#[derive(Debug, Clone)]
pub struct Table<E> {
    rows: HashMap<Uuid, Row<E>>,
    waiting: HashMap<Uuid, Vec<Uuid>>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            waiting: HashMap::new(),
        }
    }
}

impl<E: Entity> Table<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<&E> {
        self.rows.get(id).map(|row| &row.entity)
    }

    /// Mutable access to a row's entity. Links are untouched, so callers
    /// must not change the parent id.
    pub(crate) fn get_mut(&mut self, id: &Uuid) -> Option<&mut E> {
        self.rows.get_mut(id).map(|row| &mut row.entity)
    }

    pub fn row(&self, id: &Uuid) -> Option<&Row<E>> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.rows.values().map(|row| &row.entity)
    }

    /// Linked children of `id`; empty when the row is unknown.
    pub fn children(&self, id: &Uuid) -> &[Uuid] {
        self.rows
            .get(id)
            .map(|row| row.children.as_slice())
            .unwrap_or(&[])
    }

    /// Children parked for a parent that has not been seen yet.
    pub fn waiting_children(&self, parent: &Uuid) -> &[Uuid] {
        self.waiting
            .get(parent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of parked children.
    pub fn orphan_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    /// Insert a new row. Returns `false` and leaves the table unchanged if
    /// the id is already present.
    pub(crate) fn insert(&mut self, entity: E) -> bool {
        let id = entity.id();
        if self.rows.contains_key(&id) {
            return false;
        }
        let children = self.waiting.remove(&id).unwrap_or_default();
        self.rows.insert(id, Row { entity, children });
        true
    }

    /// Replace a row's fields, keeping its children. Inserts when absent.
    /// Returns the previous entity.
    pub(crate) fn replace(&mut self, entity: E) -> Option<E> {
        let id = entity.id();
        match self.rows.get_mut(&id) {
            Some(row) => Some(std::mem::replace(&mut row.entity, entity)),
            None => {
                self.insert(entity);
                None
            }
        }
    }

    /// Remove a row. Its children go back to `waiting` so a re-insert of the
    /// same id links them again.
    pub(crate) fn remove(&mut self, id: &Uuid) -> Option<E> {
        let row = self.rows.remove(id)?;
        if !row.children.is_empty() {
            self.waiting.entry(*id).or_default().extend(row.children);
        }
        Some(row.entity)
    }

    /// Link `child` under `parent`, or park it if the parent is unknown.
    pub(crate) fn adopt(&mut self, parent: Uuid, child: Uuid) {
        let list = match self.rows.get_mut(&parent) {
            Some(row) => &mut row.children,
            None => {
                tracing::debug!(
                    table = %E::KIND,
                    parent = %parent,
                    child = %child,
                    "Parent not loaded yet, parking child"
                );
                self.waiting.entry(parent).or_default()
            }
        };
        if !list.contains(&child) {
            list.push(child);
        }
    }

    /// Unlink `child` from `parent`, whether linked or parked.
    pub(crate) fn disown(&mut self, parent: Uuid, child: Uuid) {
        if let Some(row) = self.rows.get_mut(&parent) {
            row.children.retain(|c| *c != child);
        }
        if let Some(list) = self.waiting.get_mut(&parent) {
            list.retain(|c| *c != child);
            if list.is_empty() {
                self.waiting.remove(&parent);
            }
        }
    }
}
