//! The resume protocol every task implements

use crate::error::TaskError;
use crate::trap::Trap;
use crate::value::Value;

/// Input handed to a task each time it is resumed
///
/// `Ok` carries the result of the trap that suspended it (or `Value::None`
/// on the first turn); `Err` is an error injected by the kernel, such as a
/// cancellation or a timeout.
pub type Resume = Result<Value, TaskError>;

/// What a task hands back to the kernel at the end of a turn
pub enum Step {
    /// Suspend and ask the kernel to perform a trap
    Suspend(Trap),
    /// Finish successfully
    Return(Value),
    /// Finish with an error
    Raise(TaskError),
}

impl Step {
    /// Finish with `Ok` as `Return`, `Err` as `Raise`
    pub fn finish(result: Resume) -> Self {
        match result {
            Ok(value) => Step::Return(value),
            Err(e) => Step::Raise(e),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Suspend(trap) => write!(f, "Suspend({})", trap.name()),
            Step::Return(value) => write!(f, "Return({:?})", value),
            Step::Raise(e) => write!(f, "Raise({})", e),
        }
    }
}

/// A restartable, suspendable computation
///
/// The kernel calls `resume` once per scheduling turn. The computation runs
/// until it needs the kernel (a [`Trap`]) or finishes. It is never resumed
/// concurrently and never resumed again after returning `Return` or `Raise`.
pub trait Coroutine {
    /// Run until the next suspension point
    fn resume(&mut self, input: Resume) -> Step;
}

impl<F> Coroutine for F
where
    F: FnMut(Resume) -> Step,
{
    fn resume(&mut self, input: Resume) -> Step {
        self(input)
    }
}
