//! Identifiers handed out by the kernel

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a Task
///
/// Identifiers increase monotonically for the lifetime of the process, so
/// comparing two ids orders tasks by creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Identifier of a kernel-owned wait set
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WaitSetId(u64);

impl WaitSetId {
    /// Create a new unique wait set ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for WaitSetId {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion token tying a wake-up to one particular wait
///
/// A task blocked on an external future remembers the token it was issued;
/// wake requests carrying any other token are stale and ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Create a new unique token
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}
