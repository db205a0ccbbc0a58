//! End-to-end scheduling behaviour through the public kernel API

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use common::{init_logging, seen, Script};
use spindle_kernel::{
    promise, Activation, Kernel, KernelConfig, KernelError, Resume, Step, TaskError, TaskId,
    TaskState, Trap, Value, WaitState,
};

/// Records the order in which tasks finish
struct Finished(Rc<RefCell<Vec<TaskId>>>);

impl Activation for Finished {
    fn terminated(&mut self, task: TaskId, _state: TaskState) {
        self.0.borrow_mut().push(task);
    }
}

#[test]
fn test_yielding_tasks_finish_in_spawn_order() {
    init_logging();
    let finished = Rc::new(RefCell::new(Vec::new()));
    let mut kernel =
        Kernel::with_config(KernelConfig::default().with_activation(Finished(finished.clone())));
    let t1 = kernel.spawn(Script::blind(vec![Trap::Yield]), false);
    let t2 = kernel.spawn(Script::blind(vec![Trap::Yield]), false);
    assert!(t1 < t2);

    assert_eq!(kernel.run(None).unwrap(), Value::None);
    assert_eq!(*finished.borrow(), vec![t1, t2]);
}

#[test]
fn test_future_completion_beats_timeout() {
    init_logging();
    let mut kernel = Kernel::new();
    let (future, resolver) = promise();
    let worker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        resolver.resolve(Ok(Value::Int(99)))
    });

    let log = seen();
    let started = Instant::now();
    let value = kernel
        .block_on(Script::new(
            vec![
                Trap::SetTimeout(Instant::now() + Duration::from_secs(10)),
                Trap::future(future),
                Trap::UnsetTimeout(None),
                Trap::GetTimeout,
            ],
            &log,
        ))
        .unwrap();

    assert!(worker.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.borrow()[1], Ok(Value::Int(99)));
    assert_eq!(value, Value::Deadline(None));
}

#[test]
fn test_short_timeout_interrupts_long_sleep() {
    init_logging();
    let mut kernel = Kernel::new();
    let started = Instant::now();
    let err = kernel
        .run(Some(Box::new(Script::blind(vec![
            Trap::SetTimeout(Instant::now() + Duration::from_millis(10)),
            Trap::Sleep(Duration::from_secs(10)),
        ]))))
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        KernelError::Task { task, source } => {
            assert!(source.is_timeout());
            assert_eq!(kernel.task_state(task), Some(TaskState::Cancelled));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_run_returns_after_last_non_daemon_and_shutdown_cancels_daemons() {
    init_logging();
    let mut kernel = Kernel::new();
    let daemon = kernel.spawn(
        Script::blind(vec![Trap::Sleep(Duration::from_secs(3600))]),
        true,
    );
    let job = kernel.spawn(
        Script::blind(vec![Trap::Sleep(Duration::from_millis(5))]),
        false,
    );

    kernel.run(None).unwrap();
    assert_eq!(kernel.task_state(job), Some(TaskState::Terminated));
    assert_eq!(
        kernel.task_state(daemon),
        Some(TaskState::Blocked(WaitState::Sleep))
    );

    kernel.shutdown().unwrap();
    assert_eq!(kernel.task_state(daemon), Some(TaskState::Cancelled));
    assert_eq!(kernel.outcome(daemon), Some(&Err(TaskError::Cancelled)));

    // Idempotent
    kernel.shutdown().unwrap();
    assert_eq!(kernel.task_count(), 0);
    assert!(matches!(kernel.run(None), Err(KernelError::IllegalState(_))));
    assert!(matches!(kernel.handle(), Err(KernelError::IllegalState(_))));
}

#[test]
fn test_embedder_cancel_needs_the_target_to_have_run() {
    init_logging();
    let mut kernel = Kernel::new();
    let target = kernel.spawn(
        Script::blind(vec![Trap::Sleep(Duration::from_secs(10))]),
        false,
    );

    assert_eq!(kernel.cancel(target), Err(TaskError::RetryCancel));
    assert_eq!(kernel.cancel(target), Err(TaskError::RetryCancel));

    kernel
        .run(Some(Box::new(Script::blind(vec![Trap::Yield]))))
        .unwrap();
    assert_eq!(
        kernel.task_state(target),
        Some(TaskState::Blocked(WaitState::Sleep))
    );

    assert_eq!(kernel.cancel(target), Ok(true));
    kernel.run(None).unwrap();
    assert_eq!(kernel.task_state(target), Some(TaskState::Cancelled));
    assert_eq!(kernel.cancel(target), Ok(false));
}

#[test]
fn test_joining_a_crashed_task() {
    init_logging();
    let mut kernel = Kernel::with_config(KernelConfig::default().with_log_crashes(false));
    let mut yielded = false;
    let crasher = kernel.spawn(
        move |_: Resume| {
            if !yielded {
                yielded = true;
                return Step::Suspend(Trap::Yield);
            }
            Step::Raise(TaskError::Failed("bad input".into()))
        },
        false,
    );

    // Joined once while it is alive and once after it is gone
    let log = seen();
    let results = log.clone();
    let err = kernel
        .run(Some(Box::new(move |input: Resume| {
            results.borrow_mut().push(input.clone());
            let turns = results.borrow().len();
            match turns {
                1 | 2 => Step::Suspend(Trap::Join(crasher)),
                _ => Step::finish(input),
            }
        })))
        .unwrap_err();

    let joined = Err(TaskError::Joined {
        task: crasher,
        cause: Box::new(TaskError::Failed("bad input".into())),
    });
    assert_eq!(log.borrow()[1], joined);
    assert_eq!(log.borrow()[2], joined);
    assert!(matches!(
        err,
        KernelError::Task { source: TaskError::Joined { .. }, .. }
    ));
    assert_eq!(
        kernel.outcome(crasher),
        Some(&Err(TaskError::Failed("bad input".into())))
    );
    assert_eq!(kernel.stats().tasks_crashed, 2);
}

#[test]
fn test_stats_track_lifecycle() {
    init_logging();
    let mut kernel = Kernel::new();
    for _ in 0..3 {
        kernel.spawn(Script::blind(vec![Trap::Yield]), false);
    }
    let sleeper = kernel.spawn(
        Script::blind(vec![Trap::Sleep(Duration::from_secs(60))]),
        true,
    );
    let stats = kernel.stats();
    assert_eq!(stats.tasks_spawned, 4);
    assert_eq!(stats.active_tasks, 4);
    assert_eq!(stats.ready, 4);
    assert_eq!(kernel.job_count(), 3);

    kernel.run(None).unwrap();
    let stats = kernel.stats();
    assert_eq!(stats.tasks_completed, 3);
    assert_eq!(stats.active_tasks, 1);
    assert_eq!(stats.timers, 1);

    kernel.shutdown().unwrap();
    assert_eq!(kernel.stats().tasks_cancelled, 1);
    assert_eq!(kernel.task_state(sleeper), Some(TaskState::Cancelled));
}
