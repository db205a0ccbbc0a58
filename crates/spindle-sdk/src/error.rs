//! Errors injected into, or raised by, tasks

use std::time::Instant;

use crate::types::TaskId;

/// Task-level error taxonomy
///
/// These errors travel through the resume protocol: the kernel injects them
/// into a task (cancellation, timeouts, failed waits) and a task raises them
/// to finish unsuccessfully. None of them stop the kernel except
/// [`TaskError::Exit`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled while blocked
    #[error("task cancelled")]
    Cancelled,

    /// A timeout set by the task expired while it was blocked
    #[error("task timed out (deadline {deadline:?})")]
    Timeout {
        /// The deadline that expired
        deadline: Instant,
    },

    /// The cancel target is runnable but has not consumed its last result;
    /// try again once it has been scheduled
    #[error("cancellation must be retried after the target is next scheduled")]
    RetryCancel,

    /// API misuse; fatal to the request, not to the kernel
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Ordinary failure raised by a task's own computation
    #[error("{0}")]
    Failed(String),

    /// The task's computation panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Registration or external-future failure surfaced to the waiting task
    #[error("io error: {0}")]
    Io(String),

    /// A joined task did not terminate normally
    #[error("{task} did not complete: {cause}")]
    Joined {
        /// The task that was joined
        task: TaskId,
        /// Why it ended
        cause: Box<TaskError>,
    },

    /// Explicit process-exit request; the only kernel-fatal condition
    #[error("exit requested with status {0}")]
    Exit(i32),
}

impl TaskError {
    /// True for errors that end a task as cancelled rather than crashed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::Timeout { .. })
    }

    /// True for [`TaskError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Io(e.to_string())
    }
}

impl From<String> for TaskError {
    fn from(s: String) -> Self {
        TaskError::Failed(s)
    }
}

impl From<&str> for TaskError {
    fn from(s: &str) -> Self {
        TaskError::Failed(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(TaskError::Cancelled.is_cancellation());
        assert!(TaskError::Timeout { deadline: Instant::now() }.is_cancellation());
        assert!(!TaskError::RetryCancel.is_cancellation());
        assert!(!TaskError::from("boom").is_cancellation());
    }

    #[test]
    fn test_joined_display_includes_cause() {
        let err = TaskError::Joined {
            task: TaskId::from_u64(3),
            cause: Box::new(TaskError::Failed("disk full".into())),
        };
        assert_eq!(err.to_string(), "task#3 did not complete: disk full");
    }
}
