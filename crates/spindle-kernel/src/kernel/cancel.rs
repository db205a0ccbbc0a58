//! Cancellation engine
//!
//! A task can only be cancelled while it is blocked: its [`Blocker`] says
//! exactly which kernel structure holds it, so detaching is a matter of
//! undoing that one registration. A runnable task has no blocker; the caller
//! gets `RetryCancel` and tries again after the task's next turn.

use spindle_sdk::{TaskError, TaskId};

use super::Kernel;
use crate::task::Blocker;

impl Kernel {
    /// Deliver `error` to `target`
    ///
    /// Returns `Ok(false)` if the target is unknown or already finished and
    /// `Ok(true)` once the error is delivered or, with cancellation disabled
    /// on the target, recorded for its next blocking trap.
    pub(super) fn cancel_task(&mut self, target: TaskId, error: TaskError) -> Result<bool, TaskError> {
        if Some(target) == self.doorbell_task {
            return Err(TaskError::IllegalState(
                "the wake channel task cannot be cancelled".into(),
            ));
        }
        let Some(task) = self.tasks.get_mut(&target) else {
            return Ok(false);
        };
        if task.state.is_terminal() {
            return Ok(false);
        }
        if !task.is_blocked() {
            return Err(TaskError::RetryCancel);
        }
        if !task.allow_cancel {
            log::debug!("cancellation of {} deferred", target);
            task.cancel_pending.get_or_insert(error);
            return Ok(true);
        }

        log::debug!("cancelling {} ({:?})", target, task.blocker);
        self.detach(target);
        self.schedule(target, Err(error));
        Ok(true)
    }

    /// Remove a blocked task from whatever holds it
    pub(super) fn detach(&mut self, id: TaskId) {
        let Some(blocker) = self.tasks.get_mut(&id).and_then(|t| t.blocker.take()) else {
            return;
        };
        match blocker {
            Blocker::Io { fd, interest } => {
                if let Err(e) = self.selector.unregister(fd, interest) {
                    log::warn!("failed to unregister fd {} for {}: {}", fd, id, e);
                }
            }
            Blocker::Sleep => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.sleep = None;
                }
            }
            Blocker::Join { target } => {
                if let Some(joined) = self.tasks.get_mut(&target) {
                    joined.joining.retain(|&waiter| waiter != id);
                }
            }
            Blocker::WaitSet { set } => {
                if let Some(waiters) = self.wait_sets.get_mut(&set) {
                    waiters.retain(|&waiter| waiter != id);
                }
            }
            Blocker::Future { mut future, .. } => {
                // Dropping the blocker forgets the token, so a late
                // completion is discarded as stale
                if !future.cancel() {
                    log::trace!("future of {} could not be cancelled", id);
                }
            }
            Blocker::Signal => self.signals.stop_waiting(id),
        }
    }
}
