//! Kernel-level errors
//!
//! Task failures stay inside tasks (see [`TaskError`]); only the conditions
//! below ever escape [`Kernel::run`](crate::Kernel::run).

use spindle_sdk::{TaskError, TaskId};

/// Errors returned by kernel entry points
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A task asked for the process to exit; its own cleanup has already run
    #[error("exit requested with status {0}")]
    Exit(i32),

    /// The main task of `run` did not complete normally
    #[error("{task} failed: {source}")]
    Task {
        /// The main task
        task: TaskId,
        /// How it ended
        source: TaskError,
    },

    /// API misuse
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Every remaining task is blocked and nothing can wake any of them
    #[error("deadlock: {blocked} task(s) blocked with no timers, I/O or wake channel")]
    Deadlock {
        /// Number of blocked tasks
        blocked: usize,
    },

    /// OS-level failure of the selector or the wake channel
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for kernel entry points
pub type KernelResult<T> = Result<T, KernelError>;
