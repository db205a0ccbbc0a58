//! Orderly shutdown

use spindle_sdk::{Coroutine, Resume, Step, TaskError, TaskId, Trap, Value};

use super::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::task::{Blocker, Body};

/// Where the reaper is with its current target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Cancel,
    AwaitCancel,
    AwaitJoin,
}

/// Internal main task of a shutdown run: cancels each target in turn and
/// joins it, retrying while the target is runnable
struct Reaper {
    targets: Vec<TaskId>,
    next: usize,
    stage: Stage,
}

impl Reaper {
    fn new(targets: Vec<TaskId>) -> Self {
        Self {
            targets,
            next: 0,
            stage: Stage::Cancel,
        }
    }

    fn advance(&mut self) {
        self.next += 1;
        self.stage = Stage::Cancel;
    }
}

impl Coroutine for Reaper {
    fn resume(&mut self, input: Resume) -> Step {
        let mut input = Some(input);
        loop {
            let Some(&target) = self.targets.get(self.next) else {
                return Step::Return(Value::None);
            };
            match self.stage {
                Stage::Cancel => {
                    self.stage = Stage::AwaitCancel;
                    return Step::Suspend(Trap::Cancel(target));
                }
                Stage::AwaitCancel => match input.take() {
                    Some(Err(TaskError::RetryCancel)) => {
                        self.stage = Stage::Cancel;
                        return Step::Suspend(Trap::Yield);
                    }
                    Some(Ok(Value::Bool(true))) => {
                        self.stage = Stage::AwaitJoin;
                        return Step::Suspend(Trap::Join(target));
                    }
                    Some(Err(e)) => {
                        log::debug!("shutdown skipping {}: {}", target, e);
                        self.advance();
                    }
                    _ => self.advance(),
                },
                Stage::AwaitJoin => {
                    // How the target ended does not matter here
                    let _ = input.take();
                    self.advance();
                }
            }
        }
    }
}

impl Kernel {
    /// Cancel every task, newest first, and release OS resources
    ///
    /// Daemon tasks are cancelled too. Calling it again does nothing; `run`
    /// afterwards fails with `IllegalState`.
    pub fn shutdown(&mut self) -> KernelResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        log::debug!("shutting down with {} task(s)", self.task_count());

        let doorbell_task = self.doorbell_task;
        let mut targets = Vec::new();
        for task in self.tasks.values_mut() {
            if Some(task.id) == doorbell_task {
                continue;
            }
            if task.daemon {
                task.daemon = false;
                self.njobs += 1;
            }
            targets.push(task.id);
        }
        targets.sort_unstable_by(|a, b| b.cmp(a));

        let result = if targets.is_empty() {
            Ok(Value::None)
        } else {
            self.activate();
            let reaper = self.insert_task(Body::Coroutine(Box::new(Reaper::new(targets))), false);
            let result = self.run_loop(Some(reaper));
            self.outcomes.remove(reaper);
            result
        };
        self.teardown();

        match result {
            Ok(_) => Ok(()),
            // The reaper itself never fails
            Err(KernelError::Task { source, .. }) => {
                Err(KernelError::IllegalState(format!("shutdown failed: {}", source)))
            }
            Err(e) => Err(e),
        }
    }

    /// Retire the doorbell task, restore signals and close the wake channel
    fn teardown(&mut self) {
        if let Some(id) = self.doorbell_task.take() {
            if let Some(mut task) = self.tasks.remove(&id) {
                let registration = match task.blocker.take() {
                    Some(Blocker::Io { fd, interest }) => Some((fd, interest)),
                    _ => task.last_io.take(),
                };
                if let Some((fd, interest)) = registration {
                    if let Err(e) = self.selector.unregister(fd, interest) {
                        log::warn!("failed to unregister doorbell fd {}: {}", fd, e);
                    }
                }
                self.ready.retain(|queued| queued != id);
            }
        }
        if self.signals.is_active() {
            log::debug!("restoring signal dispositions");
        }
        self.signals.restore_all();
        if let Some(doorbell) = self.doorbell.take() {
            doorbell.close();
        }
        log::debug!("shutdown complete");
    }
}
