//! Task lifecycle observers
//!
//! Activations are notified as tasks move through the kernel. They run on
//! the kernel thread, between task turns, and must not block.

use spindle_sdk::TaskId;

use crate::task::TaskState;

/// Observer of task lifecycle transitions
///
/// Every method has an empty default so implementations only override what
/// they need.
pub trait Activation {
    /// The kernel started running (once per kernel)
    fn activate(&mut self) {}

    /// A task was created
    fn created(&mut self, _task: TaskId) {}

    /// A task is about to be resumed
    fn running(&mut self, _task: TaskId) {}

    /// A task ended its turn with a trap
    fn suspended(&mut self, _task: TaskId, _trap: &'static str) {}

    /// A task reached a terminal state
    fn terminated(&mut self, _task: TaskId, _state: TaskState) {}
}

/// Activation that writes every transition to the `log` facade at trace level
#[derive(Debug, Default)]
pub struct TraceActivation;

impl Activation for TraceActivation {
    fn activate(&mut self) {
        log::trace!("kernel activated");
    }

    fn created(&mut self, task: TaskId) {
        log::trace!("{} created", task);
    }

    fn running(&mut self, task: TaskId) {
        log::trace!("{} running", task);
    }

    fn suspended(&mut self, task: TaskId, trap: &'static str) {
        log::trace!("{} suspended on {}", task, trap);
    }

    fn terminated(&mut self, task: TaskId, state: TaskState) {
        log::trace!("{} terminated as {:?}", task, state);
    }
}
