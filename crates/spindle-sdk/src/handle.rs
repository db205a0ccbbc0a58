//! Thread-safe wake-up surface of a kernel
//!
//! `KernelHandle` is the only piece of a kernel that may be used off the
//! kernel thread. It never touches kernel state directly: it queues a
//! [`WakeRequest`] and rings the kernel's doorbell, and the kernel applies
//! the request on its own thread.

use std::fmt;
use std::sync::Arc;

use crate::coroutine::Resume;
use crate::types::{TaskId, Token};

/// A request to resume a task blocked on an external future
#[derive(Debug)]
pub struct WakeRequest {
    /// Task to resume
    pub task: TaskId,
    /// Token of the wait being completed; `None` completes whatever future
    /// the task is currently waiting on
    pub token: Option<Token>,
    /// What the task is resumed with
    pub result: Resume,
}

/// Receiving end of wake requests, implemented by the kernel
pub trait WakeSink: Send + Sync {
    /// Queue a request; must not block
    fn push(&self, request: WakeRequest);

    /// Wake the kernel thread; must not block and must be safe to call from
    /// foreign-thread completion callbacks
    fn ring(&self);
}

/// Cloneable, `Send + Sync` handle for waking tasks on a kernel
#[derive(Clone)]
pub struct KernelHandle {
    sink: Arc<dyn WakeSink>,
}

impl KernelHandle {
    /// Wrap a wake sink
    pub fn new(sink: Arc<dyn WakeSink>) -> Self {
        Self { sink }
    }

    /// Resume `task` with `result` if it is still waiting on `token`
    pub fn wake(&self, task: TaskId, token: Option<Token>, result: Resume) {
        self.sink.push(WakeRequest {
            task,
            token,
            result,
        });
        self.sink.ring();
    }

    /// Wake the kernel thread without delivering anything
    pub fn ring(&self) {
        self.sink.ring();
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KernelHandle")
    }
}

/// One-shot completion of a single future wait
///
/// Handed to [`ExternalFuture::subscribe`](crate::ExternalFuture::subscribe).
/// Completing it from any thread resumes the waiting task, unless the task
/// has since stopped waiting (cancelled or timed out), in which case the
/// result is dropped.
pub struct Completer {
    handle: KernelHandle,
    task: TaskId,
    token: Token,
}

impl Completer {
    /// Create a completer for `task` waiting with `token`
    pub fn new(handle: KernelHandle, task: TaskId, token: Token) -> Self {
        Self {
            handle,
            task,
            token,
        }
    }

    /// The waiting task
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The token of the wait
    pub fn token(&self) -> Token {
        self.token
    }

    /// The kernel the task runs on
    pub fn handle(&self) -> &KernelHandle {
        &self.handle
    }

    /// Deliver the result
    pub fn complete(self, result: Resume) {
        self.handle.wake(self.task, Some(self.token), result);
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("task", &self.task)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<WakeRequest>>,
        rings: Mutex<usize>,
    }

    impl WakeSink for RecordingSink {
        fn push(&self, request: WakeRequest) {
            self.requests.lock().push(request);
        }

        fn ring(&self) {
            *self.rings.lock() += 1;
        }
    }

    #[test]
    fn test_completer_wakes_with_its_token() {
        let sink = Arc::new(RecordingSink::default());
        let handle = KernelHandle::new(sink.clone());
        let task = TaskId::new();
        let token = Token::new();

        Completer::new(handle.clone(), task, token).complete(Ok(Value::Int(9)));
        handle.ring();

        let requests = sink.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].task, task);
        assert_eq!(requests[0].token, Some(token));
        assert!(matches!(requests[0].result, Ok(Value::Int(9))));
        assert_eq!(*sink.rings.lock(), 2);
    }

    #[test]
    fn test_handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KernelHandle>();
        assert_send_sync::<Completer>();
    }
}
