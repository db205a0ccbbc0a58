//! The scheduling kernel
//!
//! One `Kernel` owns every piece of scheduler state: the task table, the
//! ready queue, the timer heap, the readiness selector, the wake channel and
//! the signal router. Only the thread that calls [`Kernel::run`] touches that
//! state; other threads reach the kernel solely through a [`KernelHandle`].
//!
//! Each loop iteration polls for readiness and expired timers, then gives
//! every task that was runnable at the start of the pass one turn. A turn
//! resumes the task's coroutine and dispatches the trap it suspends with,
//! either parking the task or answering it on the spot, in which case the
//! task keeps running.

mod cancel;
mod dispatch;
mod shutdown;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use spindle_sdk::{
    Coroutine, KernelHandle, Resume, Step, TaskError, TaskId, Value, WaitSetId,
};

use crate::activation::Activation;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::outcome::OutcomeTable;
use crate::ready::ReadyQueue;
use crate::selector::{Event, PollSelector, Selector};
use crate::signal::SignalRouter;
use crate::task::{Blocker, Body, Outcome, Task, TaskState};
use crate::timer::{TimerHeap, TimerKind};
use crate::wake::Doorbell;

/// Kernel statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Tasks that returned normally
    pub tasks_completed: u64,

    /// Tasks ended by cancellation or timeout
    pub tasks_cancelled: u64,

    /// Tasks ended by an error or a panic
    pub tasks_crashed: u64,

    /// Tasks currently in the table
    pub active_tasks: usize,

    /// Tasks in the ready queue
    pub ready: usize,

    /// Timer entries, stale ones included
    pub timers: usize,

    /// Finished tasks whose outcome is still retained
    pub outcomes: usize,
}

/// What happens after a trap is dispatched
pub(crate) enum Flow {
    /// Answered synchronously; the task keeps its turn with this input
    Continue(Resume),
    /// The task was parked, requeued or terminated
    End,
}

/// Single-threaded cooperative scheduler
pub struct Kernel {
    tasks: FxHashMap<TaskId, Task>,
    ready: ReadyQueue,
    timers: TimerHeap,
    selector: Box<dyn Selector>,
    /// Reused across polls
    events: Vec<Event>,

    /// Created on first use
    doorbell: Option<Doorbell>,
    doorbell_task: Option<TaskId>,
    signals: SignalRouter,

    wait_sets: FxHashMap<WaitSetId, VecDeque<TaskId>>,
    /// Final state and result of recently finished tasks
    outcomes: OutcomeTable,
    /// Task whose end stops the current run, and how it ended
    main: Option<TaskId>,
    main_outcome: Option<Outcome>,

    /// Non-daemon tasks in the table
    njobs: usize,
    current: Option<TaskId>,
    /// Exit status requested by a task, reported by `run`
    exit: Option<i32>,

    config: KernelConfig,
    stats: KernelStats,
    activated: bool,
    shut_down: bool,
}

impl Kernel {
    /// Create a kernel with the default configuration and a `poll(2)` selector
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Create a kernel with the given configuration
    pub fn with_config(config: KernelConfig) -> Self {
        Self::with_selector(config, PollSelector::new())
    }

    /// Create a kernel on top of a custom readiness selector
    pub fn with_selector(config: KernelConfig, selector: impl Selector + 'static) -> Self {
        Self {
            tasks: FxHashMap::default(),
            ready: ReadyQueue::new(),
            timers: TimerHeap::new(),
            selector: Box::new(selector),
            events: Vec::with_capacity(config.event_capacity),
            doorbell: None,
            doorbell_task: None,
            signals: SignalRouter::new(),
            wait_sets: FxHashMap::default(),
            outcomes: OutcomeTable::new(config.outcome_capacity),
            main: None,
            main_outcome: None,
            njobs: 0,
            current: None,
            exit: None,
            config,
            stats: KernelStats::default(),
            activated: false,
            shut_down: false,
        }
    }

    /// Add a task; it first runs on the next pass of [`run`](Self::run)
    ///
    /// Daemon tasks do not keep `run(None)` going.
    pub fn spawn(&mut self, coroutine: impl Coroutine + 'static, daemon: bool) -> TaskId {
        self.insert_task(Body::Coroutine(Box::new(coroutine)), daemon)
    }

    /// Run the loop
    ///
    /// With a main task, returns its result as soon as it terminates. Without
    /// one, returns `Value::None` once no non-daemon task is left.
    pub fn run(&mut self, main: Option<Box<dyn Coroutine>>) -> KernelResult<Value> {
        if self.shut_down {
            return Err(KernelError::IllegalState(
                "kernel has been shut down".into(),
            ));
        }
        self.activate();
        let main = main.map(|c| self.insert_task(Body::Coroutine(c), false));
        self.run_loop(main)
    }

    /// Run `main` to completion, then shut down
    pub fn block_on(&mut self, main: impl Coroutine + 'static) -> KernelResult<Value> {
        let result = self.run(Some(Box::new(main)));
        let shutdown = self.shutdown();
        let value = result?;
        shutdown?;
        Ok(value)
    }

    /// Cancel a task from outside the loop
    ///
    /// Same semantics as the `Cancel` trap: `Ok(false)` for unknown or
    /// finished tasks, `Err(RetryCancel)` while the task is runnable.
    pub fn cancel(&mut self, task: TaskId) -> Result<bool, TaskError> {
        self.cancel_task(task, TaskError::Cancelled)
    }

    /// Thread-safe handle for waking tasks, creating the wake channel on first use
    pub fn handle(&mut self) -> KernelResult<KernelHandle> {
        if self.shut_down {
            return Err(KernelError::IllegalState(
                "kernel has been shut down".into(),
            ));
        }
        Ok(self.ensure_doorbell()?)
    }

    /// Current state of a task, including recently finished tasks
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks
            .get(&task)
            .map(|t| t.state)
            .or_else(|| self.outcomes.get(task).map(|(state, _)| *state))
    }

    /// Result of a recently finished task
    ///
    /// Only the last [`KernelConfig::outcome_capacity`] outcomes are kept.
    pub fn outcome(&self, task: TaskId) -> Option<&Outcome> {
        self.outcomes.get(task).map(|(_, outcome)| outcome)
    }

    /// Remove and return the result of a finished task
    ///
    /// Afterwards the task is unknown to the kernel: `Join` on it fails.
    pub fn take_outcome(&mut self, task: TaskId) -> Option<Outcome> {
        self.outcomes.remove(task).map(|(_, outcome)| outcome)
    }

    /// Turns a live task has taken so far
    pub fn task_cycles(&self, task: TaskId) -> Option<u64> {
        self.tasks.get(&task).map(|t| t.cycles)
    }

    /// Task being resumed right now, if any
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> KernelStats {
        KernelStats {
            active_tasks: self.task_count(),
            ready: self.ready.len(),
            timers: self.timers.len(),
            outcomes: self.outcomes.len(),
            ..self.stats
        }
    }

    /// Live tasks, the internal doorbell task excluded
    pub fn task_count(&self) -> usize {
        self.tasks.len() - self.doorbell_task.map_or(0, |_| 1)
    }

    /// Live non-daemon tasks
    pub fn job_count(&self) -> usize {
        self.njobs
    }

    // ===== Loop =====

    fn activate(&mut self) {
        if !self.activated {
            self.activated = true;
            self.notify(|a| a.activate());
        }
    }

    /// Drive the loop until `main` ends, or until no job is left
    fn run_loop(&mut self, main: Option<TaskId>) -> KernelResult<Value> {
        self.main = main;
        let result = self.drive(main);
        self.main = None;
        self.main_outcome = None;
        result
    }

    fn drive(&mut self, main: Option<TaskId>) -> KernelResult<Value> {
        loop {
            if let Some(code) = self.exit.take() {
                return Err(KernelError::Exit(code));
            }
            match main {
                Some(id) => {
                    if let Some(outcome) = self.main_outcome.take() {
                        return outcome.map_err(|source| KernelError::Task { task: id, source });
                    }
                }
                None if self.njobs == 0 => return Ok(Value::None),
                None => {}
            }

            // Busy tasks must not starve I/O and timers
            if !self.ready.is_empty() {
                self.poll(Some(Duration::ZERO))?;
            }
            while self.ready.is_empty() {
                let timeout = self
                    .timers
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()));
                if timeout.is_none() && self.selector.is_empty() {
                    let blocked = self.tasks.values().filter(|t| t.is_blocked()).count();
                    return Err(KernelError::Deadlock { blocked });
                }
                self.poll(timeout)?;
            }

            self.run_pass();

            #[cfg(test)]
            self.assert_invariants();
        }
    }

    /// Collect readiness events and expired timers
    fn poll(&mut self, timeout: Option<Duration>) -> KernelResult<()> {
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        let polled = self.selector.poll(timeout, &mut events);
        for event in events.drain(..) {
            let Some(task) = self.tasks.get_mut(&event.owner) else {
                continue;
            };
            match task.blocker {
                Some(Blocker::Io { fd, interest }) if fd == event.fd && interest == event.interest => {
                    // The registration stays live until the task's next turn ends
                    task.blocker = None;
                    task.last_io = Some((fd, interest));
                    self.schedule(event.owner, Ok(Value::None));
                }
                _ => log::trace!("spurious readiness on fd {} for {}", event.fd, event.owner),
            }
        }
        self.events = events;
        polled?;
        self.fire_timers();
        Ok(())
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.timers.pop_expired(now) {
            let Some(task) = self.tasks.get_mut(&entry.task) else {
                continue;
            };
            match entry.kind {
                TimerKind::Sleep if task.sleep == Some(entry.deadline) => {
                    task.sleep = None;
                    task.blocker = None;
                    self.schedule(entry.task, Ok(Value::Instant(now)));
                }
                TimerKind::Timeout if task.timeout == Some(entry.deadline) => {
                    task.timeout = None;
                    self.deliver_timeout(entry.task, entry.deadline);
                }
                // Stale: the sleep was cancelled or the timeout replaced
                _ => {}
            }
        }
    }

    /// Give every task queued at the start of the pass one turn
    fn run_pass(&mut self) {
        let budget = self.ready.len();
        for _ in 0..budget {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            self.run_turn(id);
            if self.exit.is_some() {
                break;
            }
        }
    }

    fn run_turn(&mut self, id: TaskId) {
        let Some(mut input) = self.tasks.get_mut(&id).map(|t| t.next.take().unwrap_or(Ok(Value::None))) else {
            return;
        };
        loop {
            let step = self.resume(id, input);
            match self.dispatch(id, step) {
                Flow::Continue(next) => input = next,
                Flow::End => break,
            }
        }

        // Drop a registration the task did not wait on again
        if let Some(task) = self.tasks.get_mut(&id) {
            if let Some((fd, interest)) = task.last_io.take() {
                if let Err(e) = self.selector.unregister(fd, interest) {
                    log::warn!("failed to unregister fd {} for {}: {}", fd, id, e);
                }
            }
        }
    }

    /// Resume a task's body once, turning a panic into a crash
    fn resume(&mut self, id: TaskId, input: Resume) -> Step {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Step::Return(Value::None);
        };
        task.state = TaskState::Running;
        task.cycles += 1;
        let Some(body) = task.body.take() else {
            return Step::Raise(TaskError::IllegalState(format!("{} has no body", id)));
        };

        self.current = Some(id);
        self.notify(|a| a.running(id));
        let (body, step) = match body {
            Body::Coroutine(mut coroutine) => {
                let step = catch_unwind(AssertUnwindSafe(|| coroutine.resume(input)))
                    .unwrap_or_else(|payload| Step::Raise(TaskError::Panicked(panic_message(&*payload))));
                (Body::Coroutine(coroutine), step)
            }
            Body::Doorbell => (Body::Doorbell, self.service_doorbell()),
        };
        self.current = None;

        if let Some(task) = self.tasks.get_mut(&id) {
            task.body = Some(body);
        }
        step
    }

    fn dispatch(&mut self, id: TaskId, step: Step) -> Flow {
        match step {
            Step::Suspend(trap) => {
                let name = trap.name();
                log::trace!("{} trap {}", id, name);
                self.notify(|a| a.suspended(id, name));
                self.trap(id, trap)
            }
            Step::Return(value) => {
                self.terminate(id, Ok(value));
                Flow::End
            }
            Step::Raise(error) => {
                self.terminate(id, Err(error));
                Flow::End
            }
        }
    }

    // ===== Task table =====

    fn insert_task(&mut self, body: Body, daemon: bool) -> TaskId {
        let counted = matches!(body, Body::Coroutine(_));
        let task = Task::new(body, daemon);
        let id = task.id;
        if !daemon {
            self.njobs += 1;
        }
        self.tasks.insert(id, task);
        self.ready.push_back(id);
        if counted {
            self.stats.tasks_spawned += 1;
            log::debug!("{} spawned{}", id, if daemon { " (daemon)" } else { "" });
            self.notify(|a| a.created(id));
        }
        id
    }

    /// Make a task runnable with the given input
    fn schedule(&mut self, id: TaskId, input: Resume) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.state = TaskState::Ready;
            task.next = Some(input);
            self.ready.push_back(id);
        }
    }

    /// Record the outcome of a task that just finished its computation,
    /// wake its joiners and remove it from the table
    fn terminate(&mut self, id: TaskId, outcome: Outcome) {
        let Some(mut task) = self.tasks.remove(&id) else {
            return;
        };
        let state = match &outcome {
            Ok(_) => TaskState::Terminated,
            Err(e) if e.is_cancellation() => TaskState::Cancelled,
            Err(_) => TaskState::Crashed,
        };
        task.state = state;

        if let Some((fd, interest)) = task.last_io.take() {
            if let Err(e) = self.selector.unregister(fd, interest) {
                log::warn!("failed to unregister fd {} for {}: {}", fd, id, e);
            }
        }
        if !task.daemon {
            self.njobs -= 1;
        }
        self.signals.forget(id);

        for joiner in task.joining.drain(..) {
            let Some(waiter) = self.tasks.get_mut(&joiner) else {
                continue;
            };
            if matches!(waiter.blocker, Some(Blocker::Join { target }) if target == id) {
                waiter.blocker = None;
                self.schedule(joiner, join_result(id, &outcome));
            }
        }

        match &outcome {
            Ok(_) => {
                self.stats.tasks_completed += 1;
                log::debug!("{} terminated", id);
            }
            Err(e) if state == TaskState::Cancelled => {
                self.stats.tasks_cancelled += 1;
                log::debug!("{} cancelled: {}", id, e);
            }
            Err(TaskError::Exit(code)) => {
                self.stats.tasks_crashed += 1;
                log::debug!("{} requested exit with status {}", id, code);
                self.exit = Some(*code);
            }
            Err(e) => {
                self.stats.tasks_crashed += 1;
                if self.config.log_crashes {
                    log::error!("{} crashed: {}", id, e);
                }
                if let Some(handler) = self.config.crash_handler.as_mut() {
                    handler(id, e);
                }
            }
        }

        if self.main == Some(id) {
            self.main_outcome = Some(outcome.clone());
        }
        self.outcomes.insert(id, state, outcome);
        self.notify(|a| a.terminated(id, state));
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn Activation)) {
        for activation in self.config.activations.iter_mut() {
            f(activation.as_mut());
        }
    }

    // ===== Wake channel =====

    /// Open the wake channel and start its task if needed
    fn ensure_doorbell(&mut self) -> std::io::Result<KernelHandle> {
        if let Some(doorbell) = &self.doorbell {
            return Ok(doorbell.handle());
        }
        let doorbell = Doorbell::open()?;
        let handle = doorbell.handle();
        self.doorbell = Some(doorbell);
        self.doorbell_task = Some(self.insert_task(Body::Doorbell, true));
        Ok(handle)
    }

    /// One turn of the doorbell task: route signals, apply wake requests and
    /// wait for the next ring
    fn service_doorbell(&mut self) -> Step {
        let Some(doorbell) = &self.doorbell else {
            return Step::Return(Value::None);
        };
        let fd = doorbell.reader_fd();
        let signals = doorbell.drain_bytes().unwrap_or_else(|e| {
            log::warn!("doorbell read failed: {}", e);
            Vec::new()
        });
        let requests = doorbell.take_requests();

        for signo in signals {
            for task in self.signals.deliver(signo) {
                if let Some(t) = self.tasks.get_mut(&task) {
                    t.blocker = None;
                }
                self.schedule(task, Ok(Value::Signal(signo)));
            }
        }

        for request in requests {
            let Some(task) = self.tasks.get_mut(&request.task) else {
                log::debug!("dropping wake for finished {}", request.task);
                continue;
            };
            let current = match &task.blocker {
                Some(Blocker::Future { token, .. }) => {
                    request.token.map_or(true, |wanted| wanted == *token)
                }
                _ => false,
            };
            if !current {
                log::debug!("dropping stale wake for {}", request.task);
                continue;
            }
            // Completed, so the future is dropped rather than cancelled
            task.blocker = None;
            self.schedule(request.task, request.result);
        }

        Step::Suspend(spindle_sdk::Trap::ReadWait(fd))
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for id in self.ready.iter() {
            let task = &self.tasks[&id];
            assert_eq!(task.state, TaskState::Ready, "{:?}", task);
            assert!(task.blocker.is_none(), "{:?} queued while blocked", task);
            assert!(task.sleep.is_none(), "{:?} queued while sleeping", task);
        }
        for task in self.tasks.values() {
            assert_eq!(
                task.blocker.is_some(),
                matches!(task.state, TaskState::Blocked(_)),
                "{:?}",
                task
            );
        }
        let non_daemon = self.tasks.values().filter(|t| !t.daemon).count();
        assert_eq!(non_daemon, self.njobs);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        // Dispositions first: the handler must stop writing before the
        // doorbell closes
        self.signals.restore_all();
        self.doorbell_task = None;
        self.doorbell = None;
    }
}

/// What a joiner receives for a finished task
fn join_result(task: TaskId, outcome: &Outcome) -> Resume {
    match outcome {
        Ok(value) => Ok(value.clone()),
        Err(cause) => Err(TaskError::Joined {
            task,
            cause: Box::new(cause.clone()),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
