//! Change highlighting for live step arrays.
//!
//! Each run update is diffed against the previous snapshot of the same run.
//! Steps whose serialized content changed are highlighted for a fixed
//! duration. `user_input` steps are never highlighted: their changes come
//! from the user, not from the executor.
//!
//! Only tracked runs are remembered; updates for any other run are ignored.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::model::{StepRecord, StepType};

/// Step numbers whose content differs between two snapshots.
///
/// A step number missing from `previous` counts as changed. `user_input`
/// steps are excluded on either side.
pub fn changed_steps(previous: &[StepRecord], current: &[StepRecord]) -> BTreeSet<u32> {
    let before: HashMap<u32, &StepRecord> =
        previous.iter().map(|s| (s.step_number, s)).collect();

    current
        .iter()
        .filter(|step| step.step_type != StepType::UserInput)
        .filter(|step| match before.get(&step.step_number) {
            Some(old) if old.step_type == StepType::UserInput => false,
            Some(old) => fingerprint(old) != fingerprint(step),
            None => true,
        })
        .map(|step| step.step_number)
        .collect()
}

fn fingerprint(step: &StepRecord) -> String {
    serde_json::to_string(step).unwrap_or_default()
}

/// Remembers the last snapshot per tracked run and tracks highlight expiry.
#[derive(Debug)]
pub struct HighlightTracker {
    ttl: Duration,
    tracked: HashSet<Uuid>,
    snapshots: HashMap<Uuid, Vec<StepRecord>>,
    expiries: HashMap<Uuid, HashMap<u32, Instant>>,
}

impl HighlightTracker {
    /// Create a tracker whose highlights last `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tracked: HashSet::new(),
            snapshots: HashMap::new(),
            expiries: HashMap::new(),
        }
    }

    /// Start remembering snapshots of `run_id`.
    pub fn track(&mut self, run_id: Uuid) {
        self.tracked.insert(run_id);
    }

    pub fn is_tracked(&self, run_id: &Uuid) -> bool {
        self.tracked.contains(run_id)
    }

    /// Number of runs with a remembered snapshot.
    pub fn remembered(&self) -> usize {
        self.snapshots.len()
    }

    /// Record a new snapshot for `run_id` and return the newly changed steps.
    ///
    /// The first snapshot seen for a run only primes the tracker. Untracked
    /// runs are not recorded.
    pub fn observe(&mut self, run_id: Uuid, steps: &[StepRecord], now: Instant) -> BTreeSet<u32> {
        if !self.tracked.contains(&run_id) {
            return BTreeSet::new();
        }
        let changed = match self.snapshots.get(&run_id) {
            Some(previous) => changed_steps(previous, steps),
            None => BTreeSet::new(),
        };
        self.snapshots.insert(run_id, steps.to_vec());

        if !changed.is_empty() {
            let deadline = now + self.ttl;
            let expiries = self.expiries.entry(run_id).or_default();
            for step_number in &changed {
                expiries.insert(*step_number, deadline);
            }
            tracing::trace!(run_id = %run_id, changed = ?changed, "Steps highlighted");
        }

        changed
    }

    /// Steps of `run_id` still highlighted at `now`.
    pub fn highlighted(&mut self, run_id: Uuid, now: Instant) -> BTreeSet<u32> {
        let Some(expiries) = self.expiries.get_mut(&run_id) else {
            return BTreeSet::new();
        };
        expiries.retain(|_, deadline| *deadline > now);
        let active = expiries.keys().copied().collect();
        if expiries.is_empty() {
            self.expiries.remove(&run_id);
        }
        active
    }

    /// Drop the remembered snapshot and highlights of `run_id`, keeping it
    /// tracked. The next snapshot primes again.
    pub fn reset(&mut self, run_id: Uuid) {
        self.snapshots.remove(&run_id);
        self.expiries.remove(&run_id);
    }

    /// Stop tracking `run_id` and drop everything remembered about it.
    pub fn forget(&mut self, run_id: Uuid) {
        self.tracked.remove(&run_id);
        self.reset(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Vec<StepRecord> {
        vec![
            StepRecord::function(1, 0, "open"),
            StepRecord::new(2, 0, StepType::UserInput),
            StepRecord::function(3, 0, "submit"),
        ]
    }

    #[test]
    fn test_changed_steps_detects_field_change() {
        let before = program();
        let mut after = program();
        after[0].active = true;
        after[2].output = Some(serde_json::Map::new());

        let changed = changed_steps(&before, &after);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_changed_steps_ignores_user_input() {
        let before = program();
        let mut after = program();
        let mut answer = serde_json::Map::new();
        answer.insert("email".into(), "a@b.c".into());
        after[1].output = Some(answer);

        assert!(changed_steps(&before, &after).is_empty());
    }

    #[test]
    fn test_new_step_counts_as_changed() {
        let before = program();
        let mut after = program();
        after.push(StepRecord::function(4, 0, "extra"));
        assert_eq!(changed_steps(&before, &after).into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_tracker_first_snapshot_primes() {
        let mut tracker = HighlightTracker::new(Duration::from_millis(500));
        let run = Uuid::new_v4();
        tracker.track(run);
        let now = Instant::now();
        assert!(tracker.observe(run, &program(), now).is_empty());
        assert!(tracker.highlighted(run, now).is_empty());
    }

    #[test]
    fn test_tracker_highlights_expire() {
        let mut tracker = HighlightTracker::new(Duration::from_millis(500));
        let run = Uuid::new_v4();
        tracker.track(run);
        let start = Instant::now();
        tracker.observe(run, &program(), start);

        let mut next = program();
        next[0].active = true;
        let changed = tracker.observe(run, &next, start);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec![1]);

        let soon = start + Duration::from_millis(100);
        assert_eq!(tracker.highlighted(run, soon).into_iter().collect::<Vec<_>>(), vec![1]);

        let later = start + Duration::from_millis(600);
        assert!(tracker.highlighted(run, later).is_empty());
    }

    #[test]
    fn test_tracker_same_snapshot_no_change() {
        let mut tracker = HighlightTracker::new(Duration::from_secs(1));
        let run = Uuid::new_v4();
        tracker.track(run);
        let now = Instant::now();
        tracker.observe(run, &program(), now);
        assert!(tracker.observe(run, &program(), now).is_empty());
    }

    #[test]
    fn test_reset_primes_again() {
        let mut tracker = HighlightTracker::new(Duration::from_secs(1));
        let run = Uuid::new_v4();
        tracker.track(run);
        let now = Instant::now();
        tracker.observe(run, &program(), now);
        tracker.reset(run);
        assert!(tracker.is_tracked(&run));

        let mut next = program();
        next[0].active = true;
        assert!(tracker.observe(run, &next, now).is_empty());
        assert_eq!(tracker.observe(run, &program(), now).into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_untracked_runs_are_not_remembered() {
        let mut tracker = HighlightTracker::new(Duration::from_secs(1));
        let now = Instant::now();
        for _ in 0..3 {
            let listed = Uuid::new_v4();
            tracker.observe(listed, &program(), now);
            let mut next = program();
            next[0].active = true;
            assert!(tracker.observe(listed, &next, now).is_empty());
        }
        assert_eq!(tracker.remembered(), 0);
    }

    #[test]
    fn test_forget_untracks() {
        let mut tracker = HighlightTracker::new(Duration::from_secs(1));
        let run = Uuid::new_v4();
        tracker.track(run);
        tracker.observe(run, &program(), Instant::now());
        tracker.forget(run);

        assert!(!tracker.is_tracked(&run));
        assert_eq!(tracker.remembered(), 0);
    }
}
