//! Suspension requests ("traps") a task hands to the kernel
//!
//! When a task cannot proceed on its own (waiting for I/O, sleeping, joining
//! another task) or needs something only the kernel can do (spawn, cancel,
//! query the clock), it suspends with a trap. The kernel either parks the
//! task until the request is satisfied or answers it immediately.

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::coroutine::{Coroutine, Resume};
use crate::handle::Completer;
use crate::types::{TaskId, WaitSetId};

/// Readiness a task waits for on a descriptor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Descriptor is readable
    Read,
    /// Descriptor is writable
    Write,
}

/// Result that completes on some other thread or subsystem
///
/// The kernel calls [`subscribe`](ExternalFuture::subscribe) exactly once,
/// from the kernel thread, when a task starts waiting. The implementation
/// must eventually call [`Completer::complete`] (from any thread) or accept
/// a [`cancel`](ExternalFuture::cancel).
pub trait ExternalFuture {
    /// Arrange for `completer` to be completed with the result
    fn subscribe(&mut self, completer: Completer);

    /// Best-effort cancellation; returns true if the result will never be
    /// delivered
    fn cancel(&mut self) -> bool;
}

/// A suspension request
pub enum Trap {
    /// Go to the back of the ready queue
    Yield,

    /// Sleep for a duration (zero or negative behaves as `Yield`)
    Sleep(Duration),

    /// Sleep until an absolute point on the monotonic clock
    SleepUntil(Instant),

    /// Read the kernel's monotonic clock
    Clock,

    /// Block until the descriptor is readable
    ReadWait(RawFd),

    /// Block until the descriptor is writable
    WriteWait(RawFd),

    /// Ask which tasks are waiting on a descriptor
    IoWaiting(RawFd),

    /// Block until an external future completes
    FutureWait(Box<dyn ExternalFuture>),

    /// Create a new task
    Spawn {
        /// The computation to run
        coroutine: Box<dyn Coroutine>,
        /// Daemon tasks do not keep the kernel running
        daemon: bool,
    },

    /// Block until another task terminates
    Join(TaskId),

    /// Cancel another task
    Cancel(TaskId),

    /// Create a new wait set
    NewWaitSet,

    /// Block on a wait set until woken
    WaitOn(WaitSetId),

    /// Wake up to `n` tasks blocked on a wait set
    WakeWaitSet {
        /// The wait set
        set: WaitSetId,
        /// Maximum number of waiters to wake
        n: usize,
        /// What each woken task is resumed with
        result: Resume,
    },

    /// Release a wait set nobody is blocked on
    DropWaitSet(WaitSetId),

    /// Route the given OS signals to this task
    SigWatch(Vec<i32>),

    /// Stop routing the given OS signals to this task
    SigUnwatch(Vec<i32>),

    /// Block until one of the watched signals arrives
    SigWait,

    /// Read the task's current timeout deadline
    GetTimeout,

    /// Set (tighten) the task's timeout deadline
    SetTimeout(Instant),

    /// Restore a previously returned timeout deadline
    UnsetTimeout(Option<Instant>),

    /// Enable or disable delivery of cancellation to this task
    SetCancellable(bool),

    /// Ask for the running task's own id
    CurrentTask,

    /// Ask for a thread-safe handle to the kernel
    Kernel,
}

impl Trap {
    /// Stable name of the trap, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Trap::Yield => "yield",
            Trap::Sleep(_) => "sleep",
            Trap::SleepUntil(_) => "sleep_until",
            Trap::Clock => "clock",
            Trap::ReadWait(_) => "read_wait",
            Trap::WriteWait(_) => "write_wait",
            Trap::IoWaiting(_) => "io_waiting",
            Trap::FutureWait(_) => "future_wait",
            Trap::Spawn { .. } => "spawn",
            Trap::Join(_) => "join",
            Trap::Cancel(_) => "cancel",
            Trap::NewWaitSet => "new_wait_set",
            Trap::WaitOn(_) => "wait_on",
            Trap::WakeWaitSet { .. } => "wake_wait_set",
            Trap::DropWaitSet(_) => "drop_wait_set",
            Trap::SigWatch(_) => "sig_watch",
            Trap::SigUnwatch(_) => "sig_unwatch",
            Trap::SigWait => "sig_wait",
            Trap::GetTimeout => "get_timeout",
            Trap::SetTimeout(_) => "set_timeout",
            Trap::UnsetTimeout(_) => "unset_timeout",
            Trap::SetCancellable(_) => "set_cancellable",
            Trap::CurrentTask => "current_task",
            Trap::Kernel => "kernel",
        }
    }

    /// Convenience constructor for a non-daemon spawn
    pub fn spawn(coroutine: impl Coroutine + 'static) -> Self {
        Trap::Spawn {
            coroutine: Box::new(coroutine),
            daemon: false,
        }
    }

    /// Convenience constructor for a future wait
    pub fn future(future: impl ExternalFuture + 'static) -> Self {
        Trap::FutureWait(Box::new(future))
    }
}

impl std::fmt::Debug for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
