//! Results of tasks that left the task table
//!
//! Finished tasks are remembered so that a late `Join` or an embedder query
//! still sees how they ended. The table is bounded: once it holds
//! `capacity` records the oldest one is forgotten, and
//! [`Kernel::take_outcome`](crate::Kernel::take_outcome) releases a record
//! early.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use spindle_sdk::TaskId;

use crate::task::{Outcome, TaskState};

/// Bounded record of finished tasks, oldest evicted first
#[derive(Debug)]
pub(crate) struct OutcomeTable {
    records: FxHashMap<TaskId, (TaskState, Outcome)>,
    /// Insertion order; may hold ids already taken out of `records`
    order: VecDeque<TaskId>,
    capacity: usize,
}

impl OutcomeTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: FxHashMap::default(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, task: TaskId, state: TaskState, outcome: Outcome) {
        if self.capacity == 0 {
            return;
        }
        if self.records.insert(task, (state, outcome)).is_none() {
            self.order.push_back(task);
        }
        while self.records.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.records.remove(&oldest).is_some() {
                log::trace!("forgetting outcome of {}", oldest);
            }
        }
        // Ids taken early linger in `order`; compact once they dominate
        if self.order.len() > 2 * self.capacity {
            let records = &self.records;
            self.order.retain(|task| records.contains_key(task));
        }
    }

    pub(crate) fn get(&self, task: TaskId) -> Option<&(TaskState, Outcome)> {
        self.records.get(&task)
    }

    pub(crate) fn remove(&mut self, task: TaskId) -> Option<(TaskState, Outcome)> {
        self.records.remove(&task)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.order.len()
    }
}
