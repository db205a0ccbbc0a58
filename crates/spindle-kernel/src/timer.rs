//! Timer heap for sleeps and timeouts
//!
//! Entries are never removed early. When a sleep is cancelled or a timeout
//! is replaced, the task's live deadline field changes and the old entry
//! becomes stale; the scheduler discards it when it is eventually popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use spindle_sdk::TaskId;

/// What a timer entry does when it expires
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Wake a sleeping task
    Sleep,
    /// Deliver a timeout cancellation
    Timeout,
}

/// Entry in the timer heap
#[derive(Debug, Clone)]
pub struct TimerEntry {
    /// When the entry fires
    pub deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines
    seq: u64,
    /// Task the entry belongs to
    pub task: TaskId,
    /// Sleep or timeout
    pub kind: TimerKind,
}

// Reverse ordering for min-heap (earliest deadline, then earliest insertion)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Min-heap of pending sleeps and timeouts
#[derive(Debug, Default)]
pub struct TimerHeap {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an entry
    pub fn push(&mut self, deadline: Instant, task: TaskId, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimerEntry {
            deadline,
            seq,
            task,
            kind,
        });
    }

    /// Earliest deadline, stale entries included
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|e| e.deadline)
    }

    /// Pop the earliest entry if it has expired at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerEntry> {
        if self.entries.peek()?.deadline <= now {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Number of entries, stale entries included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries remain
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
