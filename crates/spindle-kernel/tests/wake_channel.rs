//! Cross-thread wake-ups and external futures

mod common;

use std::time::{Duration, Instant};

use common::{init_logging, seen, Script};
use spindle_kernel::{
    promise, Completer, ExternalFuture, Kernel, KernelError, Resume, Step, TaskError, TaskState,
    Trap, Value,
};

#[test]
fn test_many_threads_complete_many_waiters() {
    init_logging();
    let mut kernel = Kernel::new();
    let mut waiters = Vec::new();
    let mut workers = Vec::new();

    for i in 0..16i64 {
        let (future, resolver) = promise();
        waiters.push(kernel.spawn(Script::blind(vec![Trap::future(future)]), false));
        workers.push(std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis((i % 4) as u64 * 3));
            resolver.resolve(Ok(Value::Int(i)))
        }));
    }

    kernel.run(None).unwrap();
    for worker in workers {
        assert!(worker.join().unwrap());
    }
    for (i, waiter) in waiters.into_iter().enumerate() {
        assert_eq!(kernel.outcome(waiter), Some(&Ok(Value::Int(i as i64))));
    }
}

#[test]
fn test_dropped_resolver_fails_the_waiter() {
    init_logging();
    let mut kernel = Kernel::new();
    let (future, resolver) = promise();
    let log = seen();
    std::thread::spawn(move || drop(resolver));

    let err = kernel
        .run(Some(Box::new(Script::new(vec![Trap::future(future)], &log))))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Task { source: TaskError::Io(_), .. }
    ));
    assert!(matches!(log.borrow()[0], Err(TaskError::Io(_))));
}

#[test]
fn test_timed_out_future_is_cancelled() {
    init_logging();
    let mut kernel = Kernel::new();
    let (future, resolver) = promise();
    let waiter = kernel.spawn(
        Script::blind(vec![
            Trap::SetTimeout(Instant::now() + Duration::from_millis(10)),
            Trap::future(future),
        ]),
        false,
    );

    kernel.run(None).unwrap();
    assert_eq!(kernel.task_state(waiter), Some(TaskState::Cancelled));
    assert!(matches!(
        kernel.outcome(waiter),
        Some(Err(TaskError::Timeout { .. }))
    ));
    // The waiter gave up, so the late result goes nowhere
    assert!(!resolver.resolve(Ok(Value::None)));
}

/// Future completed by hand from the test body
struct Manual {
    completer: std::rc::Rc<std::cell::RefCell<Option<Completer>>>,
}

impl ExternalFuture for Manual {
    fn subscribe(&mut self, completer: Completer) {
        *self.completer.borrow_mut() = Some(completer);
    }

    fn cancel(&mut self) -> bool {
        self.completer.borrow_mut().take().is_some()
    }
}

#[test]
fn test_untokened_wake_completes_current_future_only() {
    init_logging();
    let mut kernel = Kernel::new();
    let handle = kernel.handle().unwrap();
    let slot = std::rc::Rc::new(std::cell::RefCell::new(None));
    let log = seen();
    let waiter = kernel.spawn(
        Script::new(
            vec![
                Trap::Yield,
                Trap::future(Manual {
                    completer: slot.clone(),
                }),
            ],
            &log,
        ),
        false,
    );

    // Not waiting on a future yet: dropped
    handle.wake(waiter, None, Ok(Value::Int(1)));
    std::thread::spawn({
        let handle = handle.clone();
        move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.wake(waiter, None, Ok(Value::Int(2)));
        }
    });

    kernel.run(None).unwrap();
    assert_eq!(log.borrow()[1], Ok(Value::Int(2)));
    let completer = slot.borrow_mut().take().unwrap();
    assert_eq!(completer.task(), waiter);
}

#[test]
fn test_kernel_trap_hands_out_a_working_handle() {
    init_logging();
    let mut kernel = Kernel::new();
    // Kept alive so the promise never completes on its own
    let (future, _resolver) = promise();
    let mut future = Some(future);
    let mut handle = None;
    let mut turn = 0;

    let value = kernel
        .block_on(move |input: Resume| {
            turn += 1;
            match turn {
                1 => Step::Suspend(Trap::Kernel),
                2 => {
                    handle = input.ok().and_then(|v| v.as_kernel().cloned());
                    Step::Suspend(Trap::CurrentTask)
                }
                3 => {
                    let me = input.ok().and_then(|v| v.as_task()).unwrap();
                    let handle = handle.take().unwrap();
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(5));
                        handle.wake(me, None, Ok(Value::Str("via handle".into())));
                    });
                    Step::Suspend(Trap::future(future.take().unwrap()))
                }
                _ => Step::finish(input),
            }
        })
        .unwrap();
    assert_eq!(value, Value::Str("via handle".into()));
}

#[test]
fn test_wakes_after_shutdown_are_ignored() {
    init_logging();
    let mut kernel = Kernel::new();
    let handle = kernel.handle().unwrap();
    kernel.shutdown().unwrap();

    let task = kernel.spawn(Script::blind(vec![]), false);
    handle.wake(task, None, Ok(Value::None));
    handle.ring();
    drop(kernel);
    handle.ring();
}
