//! FIFO queue of runnable tasks

use std::collections::VecDeque;

use spindle_sdk::TaskId;

/// Run queue
///
/// Tasks are appended at the back when they become runnable. A task whose
/// trap is answered synchronously never re-enters the queue: it keeps its
/// turn instead.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    tasks: VecDeque<TaskId>,
}

impl ReadyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a runnable task
    pub fn push_back(&mut self, task: TaskId) {
        self.tasks.push_back(task);
    }

    /// Take the next task to run
    pub fn pop_front(&mut self) -> Option<TaskId> {
        self.tasks.pop_front()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if nothing is runnable
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keep only the tasks for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(TaskId) -> bool) {
        self.tasks.retain(|&task| keep(task));
    }

    /// Iterate in run order
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().copied()
    }
}
