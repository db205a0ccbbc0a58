//! Task record and scheduling state

use std::fmt;
use std::os::fd::RawFd;
use std::time::Instant;

use spindle_sdk::{Coroutine, ExternalFuture, Interest, Resume, TaskError, TaskId, Token, Value, WaitSetId};

/// What a blocked task is waiting for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// Descriptor readability
    ReadWait,
    /// Descriptor writability
    WriteWait,
    /// A sleep deadline
    Sleep,
    /// An external future
    FutureWait,
    /// Another task's termination
    Join,
    /// A wait set
    WaitSet,
    /// An OS signal
    SignalWait,
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// In the ready queue
    Ready,
    /// Currently being resumed
    Running,
    /// Parked until a trap is satisfied
    Blocked(WaitState),
    /// Ended by cancellation or timeout
    Cancelled,
    /// Ended by an error from its own computation
    Crashed,
    /// Returned normally
    Terminated,
}

impl TaskState {
    /// True for the three end states
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Crashed | TaskState::Terminated
        )
    }
}

/// Final result of a task
pub type Outcome = Result<Value, TaskError>;

/// Cancellation hook: how to detach a blocked task from what it waits on
pub(crate) enum Blocker {
    /// Registered with the selector
    Io { fd: RawFd, interest: Interest },
    /// Waiting for its sleep deadline
    Sleep,
    /// In another task's join list
    Join { target: TaskId },
    /// In a wait set
    WaitSet { set: WaitSetId },
    /// Waiting for an external future
    Future {
        token: Token,
        future: Box<dyn ExternalFuture>,
    },
    /// Waiting for a watched signal
    Signal,
}

impl Blocker {
    pub(crate) fn wait_state(&self) -> WaitState {
        match self {
            Blocker::Io {
                interest: Interest::Read,
                ..
            } => WaitState::ReadWait,
            Blocker::Io {
                interest: Interest::Write,
                ..
            } => WaitState::WriteWait,
            Blocker::Sleep => WaitState::Sleep,
            Blocker::Join { .. } => WaitState::Join,
            Blocker::WaitSet { .. } => WaitState::WaitSet,
            Blocker::Future { .. } => WaitState::FutureWait,
            Blocker::Signal => WaitState::SignalWait,
        }
    }
}

impl fmt::Debug for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocker::Io { fd, interest } => write!(f, "Io({}, {:?})", fd, interest),
            Blocker::Sleep => write!(f, "Sleep"),
            Blocker::Join { target } => write!(f, "Join({})", target),
            Blocker::WaitSet { set } => write!(f, "WaitSet({})", set.as_u64()),
            Blocker::Future { token, .. } => write!(f, "Future({})", token.as_u64()),
            Blocker::Signal => write!(f, "Signal"),
        }
    }
}

/// What the kernel resumes when the task gets a turn
pub(crate) enum Body {
    /// A user computation
    Coroutine(Box<dyn Coroutine>),
    /// The kernel's own doorbell reader
    Doorbell,
}

/// A schedulable unit of suspendable computation
pub(crate) struct Task {
    pub(crate) id: TaskId,
    /// Taken out while the task is being resumed
    pub(crate) body: Option<Body>,
    pub(crate) state: TaskState,
    /// Set iff the task is blocked
    pub(crate) blocker: Option<Blocker>,
    pub(crate) daemon: bool,
    /// Input for the next resume
    pub(crate) next: Option<Resume>,
    /// Tasks blocked in `Join` on this one
    pub(crate) joining: Vec<TaskId>,
    pub(crate) sleep: Option<Instant>,
    pub(crate) timeout: Option<Instant>,
    /// Registration that fired and is still live with the selector
    pub(crate) last_io: Option<(RawFd, Interest)>,
    pub(crate) allow_cancel: bool,
    /// Cancellation to deliver at the next blocking trap
    pub(crate) cancel_pending: Option<TaskError>,
    /// Number of turns taken
    pub(crate) cycles: u64,
}

impl Task {
    pub(crate) fn new(body: Body, daemon: bool) -> Self {
        Self {
            id: TaskId::new(),
            body: Some(body),
            state: TaskState::Ready,
            blocker: None,
            daemon,
            next: None,
            joining: Vec::new(),
            sleep: None,
            timeout: None,
            last_io: None,
            allow_cancel: true,
            cancel_pending: None,
            cycles: 0,
        }
    }

    /// Park the task behind `blocker`
    pub(crate) fn block(&mut self, blocker: Blocker) {
        self.state = TaskState::Blocked(blocker.wait_state());
        self.blocker = Some(blocker);
    }

    /// True while the task is blocked on something the kernel can detach it from
    pub(crate) fn is_blocked(&self) -> bool {
        self.blocker.is_some()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("blocker", &self.blocker)
            .field("daemon", &self.daemon)
            .field("sleep", &self.sleep)
            .field("timeout", &self.timeout)
            .field("cycles", &self.cycles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_sdk::Step;

    fn noop() -> Body {
        Body::Coroutine(Box::new(|_: Resume| Step::Return(Value::None)))
    }

    #[test]
    fn test_new_task_is_ready() {
        let task = Task::new(noop(), false);
        assert_eq!(task.state, TaskState::Ready);
        assert!(!task.is_blocked());
        assert!(task.allow_cancel);
        assert_eq!(task.cycles, 0);
    }

    #[test]
    fn test_block_sets_named_state() {
        let mut task = Task::new(noop(), true);
        task.block(Blocker::Io {
            fd: 3,
            interest: Interest::Write,
        });
        assert_eq!(task.state, TaskState::Blocked(WaitState::WriteWait));
        assert!(task.is_blocked());

        task.block(Blocker::Sleep);
        assert_eq!(task.state, TaskState::Blocked(WaitState::Sleep));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Crashed.is_terminal());
        assert!(TaskState::Terminated.is_terminal());
        assert!(!TaskState::Blocked(WaitState::Join).is_terminal());
        assert!(!TaskState::Ready.is_terminal());
    }
}
