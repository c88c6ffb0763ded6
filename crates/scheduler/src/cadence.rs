//! Cadence composer: which registered tasks are due at a given instant.
//!
//! One composer hosts several tasks with independent intervals inside a single
//! loop. It is owned by that loop's control task, so `last_run_at` needs no
//! lock: nothing else ever touches it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::TaskDefinition;

#[derive(Debug)]
struct Slot {
    definition: Arc<TaskDefinition>,
    /// `None` is the "never run" sentinel.
    last_run_at: Option<Instant>,
}

impl Slot {
    fn due_at(&self, anchored_at: Instant) -> Instant {
        match self.last_run_at {
            None => anchored_at + self.definition.startup_grace(),
            Some(last) => last + self.definition.interval(),
        }
    }
}

/// Tracks `LastRunAt` per task and resolves due tasks in registration order.
#[derive(Debug)]
pub struct CadenceComposer {
    slots: Vec<Slot>,
    anchored_at: Instant,
}

impl CadenceComposer {
    /// `anchored_at` is the loop start; startup grace delays count from it.
    pub fn new(definitions: Vec<Arc<TaskDefinition>>, anchored_at: Instant) -> Self {
        let slots = definitions
            .into_iter()
            .map(|definition| Slot {
                definition,
                last_run_at: None,
            })
            .collect();
        Self { slots, anchored_at }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn definition(&self, index: usize) -> Option<&Arc<TaskDefinition>> {
        self.slots.get(index).map(|s| &s.definition)
    }

    /// Indices of the tasks due at `now`, in registration order. Pure.
    pub fn due(&self, now: Instant) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| now >= slot.due_at(self.anchored_at))
            .map(|(i, _)| i)
            .collect()
    }

    /// Record that the task at `index` was dispatched at `now`.
    ///
    /// Called on dispatch, not on completion: a slow cycle never makes its task
    /// re-fire immediately, and never touches other tasks' timestamps.
    pub fn mark_dispatched(&mut self, index: usize, now: Instant) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.last_run_at = Some(now);
        }
    }

    /// Resolve the due tasks and mark all of them dispatched at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<Arc<TaskDefinition>> {
        let due = self.due(now);
        due.into_iter()
            .map(|i| {
                self.mark_dispatched(i, now);
                self.slots[i].definition.clone()
            })
            .collect()
    }

    pub fn last_run_at(&self, task_name: &str) -> Option<Instant> {
        self.slots
            .iter()
            .find(|s| s.definition.name() == task_name)
            .and_then(|s| s.last_run_at)
    }

    /// Time until the earliest task becomes due (zero if one is already due).
    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.slots
            .iter()
            .map(|s| s.due_at(self.anchored_at).saturating_duration_since(now))
            .min()
    }
}
