//! Trap dispatch
//!
//! Every trap is handled in exactly one way: the task is either parked
//! (ready queue, timer heap, wait set, join list, signal wait or selector),
//! or answered on the spot with [`Flow::Continue`].

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::time::Instant;

use spindle_sdk::{
    Completer, ExternalFuture, Interest, Resume, TaskError, TaskId, Token, Trap, Value, WaitSetId,
};

use super::{join_result, Flow, Kernel};
use crate::defaults::MAX_SLEEP;
use crate::task::{Blocker, Body};
use crate::timer::TimerKind;

impl Kernel {
    pub(super) fn trap(&mut self, id: TaskId, trap: Trap) -> Flow {
        match trap {
            Trap::Yield => self.yield_now(id),
            Trap::Sleep(duration) => {
                let now = Instant::now();
                let deadline = now
                    .checked_add(duration.min(MAX_SLEEP))
                    .unwrap_or(now);
                self.sleep_until(id, deadline)
            }
            Trap::SleepUntil(deadline) => self.sleep_until(id, deadline),
            Trap::Clock => Flow::Continue(Ok(Value::Instant(Instant::now()))),
            Trap::ReadWait(fd) => self.io_wait(id, fd, Interest::Read),
            Trap::WriteWait(fd) => self.io_wait(id, fd, Interest::Write),
            Trap::IoWaiting(fd) => {
                let (reader, writer) = self.selector.waiting(fd);
                let as_value = |t: Option<TaskId>| t.map_or(Value::None, Value::Task);
                Flow::Continue(Ok(Value::List(vec![as_value(reader), as_value(writer)])))
            }
            Trap::FutureWait(future) => self.future_wait(id, future),
            Trap::Spawn { coroutine, daemon } => {
                let child = self.insert_task(Body::Coroutine(coroutine), daemon);
                Flow::Continue(Ok(Value::Task(child)))
            }
            Trap::Join(target) => self.join(id, target),
            Trap::Cancel(target) => {
                if target == id {
                    return Flow::Continue(Err(TaskError::IllegalState(
                        "a task cannot cancel itself".into(),
                    )));
                }
                Flow::Continue(self.cancel_task(target, TaskError::Cancelled).map(Value::Bool))
            }
            Trap::NewWaitSet => {
                let set = WaitSetId::new();
                self.wait_sets.insert(set, VecDeque::new());
                Flow::Continue(Ok(Value::WaitSet(set)))
            }
            Trap::WaitOn(set) => self.wait_on(id, set),
            Trap::WakeWaitSet { set, n, result } => self.wake_wait_set(set, n, result),
            Trap::DropWaitSet(set) => Flow::Continue(self.drop_wait_set(set)),
            Trap::SigWatch(signals) => Flow::Continue(self.sig_watch(id, &signals)),
            Trap::SigUnwatch(signals) => Flow::Continue(
                self.signals
                    .unwatch(id, &signals)
                    .map(|()| Value::None),
            ),
            Trap::SigWait => self.sig_wait(id),
            Trap::GetTimeout => {
                let timeout = self.tasks.get(&id).and_then(|t| t.timeout);
                Flow::Continue(Ok(Value::Deadline(timeout)))
            }
            Trap::SetTimeout(deadline) => self.set_timeout(id, deadline),
            Trap::UnsetTimeout(previous) => self.unset_timeout(id, previous),
            Trap::SetCancellable(allow) => {
                let Some(task) = self.tasks.get_mut(&id) else {
                    return Flow::End;
                };
                let previous = std::mem::replace(&mut task.allow_cancel, allow);
                Flow::Continue(Ok(Value::Bool(previous)))
            }
            Trap::CurrentTask => Flow::Continue(Ok(Value::Task(id))),
            Trap::Kernel => Flow::Continue(
                self.ensure_doorbell()
                    .map(Value::Kernel)
                    .map_err(TaskError::from),
            ),
        }
    }

    /// Deferred cancellation, delivered when a task is about to block
    fn take_pending_cancel(&mut self, id: TaskId) -> Option<TaskError> {
        let task = self.tasks.get_mut(&id)?;
        if task.allow_cancel {
            task.cancel_pending.take()
        } else {
            None
        }
    }

    fn yield_now(&mut self, id: TaskId) -> Flow {
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        self.schedule(id, Ok(Value::Instant(Instant::now())));
        Flow::End
    }

    fn sleep_until(&mut self, id: TaskId, deadline: Instant) -> Flow {
        if deadline <= Instant::now() {
            return self.yield_now(id);
        }
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        let Some(task) = self.tasks.get_mut(&id) else {
            return Flow::End;
        };
        task.sleep = Some(deadline);
        task.block(Blocker::Sleep);
        self.timers.push(deadline, id, TimerKind::Sleep);
        Flow::End
    }

    fn io_wait(&mut self, id: TaskId, fd: RawFd, interest: Interest) -> Flow {
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        let Some(task) = self.tasks.get_mut(&id) else {
            return Flow::End;
        };
        if task.last_io == Some((fd, interest)) {
            // Waiting on the registration that just fired: still live
            task.last_io = None;
        } else {
            if let Some((old_fd, old_interest)) = task.last_io.take() {
                if let Err(e) = self.selector.unregister(old_fd, old_interest) {
                    log::warn!("failed to unregister fd {} for {}: {}", old_fd, id, e);
                }
            }
            if let Err(e) = self.selector.register(fd, interest, id) {
                return Flow::Continue(Err(TaskError::from(e)));
            }
        }
        task.block(Blocker::Io { fd, interest });
        Flow::End
    }

    fn future_wait(&mut self, id: TaskId, mut future: Box<dyn ExternalFuture>) -> Flow {
        if let Some(err) = self.take_pending_cancel(id) {
            future.cancel();
            return Flow::Continue(Err(err));
        }
        let handle = match self.ensure_doorbell() {
            Ok(handle) => handle,
            Err(e) => {
                future.cancel();
                return Flow::Continue(Err(TaskError::from(e)));
            }
        };
        let token = Token::new();
        // May complete synchronously; the request then waits in the queue
        // until the doorbell task runs
        future.subscribe(Completer::new(handle, id, token));
        if let Some(task) = self.tasks.get_mut(&id) {
            task.block(Blocker::Future { token, future });
        }
        Flow::End
    }

    fn join(&mut self, id: TaskId, target: TaskId) -> Flow {
        if target == id {
            return Flow::Continue(Err(TaskError::IllegalState(
                "a task cannot join itself".into(),
            )));
        }
        if !self.tasks.contains_key(&target) {
            return Flow::Continue(match self.outcomes.get(target) {
                Some((_, outcome)) => join_result(target, outcome),
                None => Err(TaskError::IllegalState(format!("no record of {}", target))),
            });
        }
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        if let Some(joined) = self.tasks.get_mut(&target) {
            joined.joining.push(id);
        }
        if let Some(task) = self.tasks.get_mut(&id) {
            task.block(Blocker::Join { target });
        }
        Flow::End
    }

    fn wait_on(&mut self, id: TaskId, set: WaitSetId) -> Flow {
        if !self.wait_sets.contains_key(&set) {
            return Flow::Continue(Err(unknown_wait_set(set)));
        }
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        if let Some(waiters) = self.wait_sets.get_mut(&set) {
            waiters.push_back(id);
        }
        if let Some(task) = self.tasks.get_mut(&id) {
            task.block(Blocker::WaitSet { set });
        }
        Flow::End
    }

    fn wake_wait_set(&mut self, set: WaitSetId, n: usize, result: Resume) -> Flow {
        let Some(waiters) = self.wait_sets.get_mut(&set) else {
            return Flow::Continue(Err(unknown_wait_set(set)));
        };
        let count = n.min(waiters.len());
        let woken: Vec<TaskId> = waiters.drain(..count).collect();
        for waiter in &woken {
            if let Some(task) = self.tasks.get_mut(waiter) {
                task.blocker = None;
            }
            self.schedule(*waiter, result.clone());
        }
        Flow::Continue(Ok(Value::Int(woken.len() as i64)))
    }

    fn drop_wait_set(&mut self, set: WaitSetId) -> Resume {
        match self.wait_sets.get(&set) {
            None => Err(unknown_wait_set(set)),
            Some(waiters) if !waiters.is_empty() => Err(TaskError::IllegalState(format!(
                "wait set {} still has {} waiter(s)",
                set.as_u64(),
                waiters.len()
            ))),
            Some(_) => {
                self.wait_sets.remove(&set);
                Ok(Value::None)
            }
        }
    }

    fn sig_watch(&mut self, id: TaskId, signals: &[i32]) -> Resume {
        self.ensure_doorbell()?;
        let fd = self
            .doorbell
            .as_ref()
            .and_then(|d| d.writer_fd())
            .ok_or_else(|| TaskError::IllegalState("wake channel is closed".into()))?;
        self.signals.watch(id, signals, fd)?;
        Ok(Value::None)
    }

    fn sig_wait(&mut self, id: TaskId) -> Flow {
        if let Some(signo) = self.signals.take_pending(id) {
            return Flow::Continue(Ok(Value::Signal(signo)));
        }
        if !self.signals.is_watching(id) {
            return Flow::Continue(Err(TaskError::IllegalState(
                "waiting for signals without watching any".into(),
            )));
        }
        if let Some(err) = self.take_pending_cancel(id) {
            return Flow::Continue(Err(err));
        }
        self.signals.set_waiting(id);
        if let Some(task) = self.tasks.get_mut(&id) {
            task.block(Blocker::Signal);
        }
        Flow::End
    }

    fn set_timeout(&mut self, id: TaskId, deadline: Instant) -> Flow {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Flow::End;
        };
        let previous = task.timeout;
        let effective = previous.map_or(deadline, |p| p.min(deadline));
        if previous != Some(effective) {
            task.timeout = Some(effective);
            self.timers.push(effective, id, TimerKind::Timeout);
        }
        Flow::Continue(Ok(Value::Deadline(previous)))
    }

    fn unset_timeout(&mut self, id: TaskId, previous: Option<Instant>) -> Flow {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Flow::End;
        };
        let replaced = std::mem::replace(&mut task.timeout, previous);
        if matches!(task.cancel_pending, Some(TaskError::Timeout { .. })) {
            task.cancel_pending = None;
        }
        // An outer entry is only discarded as stale once its deadline has
        // passed under a different timeout
        let now = Instant::now();
        if let Some(deadline) = previous {
            if replaced != previous && deadline <= now {
                self.timers.push(deadline, id, TimerKind::Timeout);
            }
        }
        Flow::Continue(Ok(Value::Instant(now)))
    }

    /// A timeout entry matched the task's live deadline
    pub(super) fn deliver_timeout(&mut self, id: TaskId, deadline: Instant) {
        let error = TaskError::Timeout { deadline };
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if task.is_blocked() && task.allow_cancel {
            log::debug!("{} timed out", id);
            self.detach(id);
            self.schedule(id, Err(error));
        } else if task.cancel_pending.is_none() && !task.state.is_terminal() {
            task.cancel_pending = Some(error);
        }
    }
}

fn unknown_wait_set(set: WaitSetId) -> TaskError {
    TaskError::IllegalState(format!("unknown wait set {}", set.as_u64()))
}
