//! One-shot external future resolvable from any thread

use std::sync::Arc;

use parking_lot::Mutex;

use crate::coroutine::Resume;
use crate::error::TaskError;
use crate::handle::Completer;
use crate::trap::ExternalFuture;

enum State {
    /// Not resolved; holds the completer once a task waits
    Pending(Option<Completer>),
    /// Resolved before anyone subscribed
    Resolved(Resume),
    /// Result handed to a completer
    Delivered,
    /// Waiter gave up
    Cancelled,
}

/// Waiting half of a promise; pass it to [`Trap::FutureWait`](crate::Trap::FutureWait)
pub struct Promise {
    state: Arc<Mutex<State>>,
}

/// Resolving half of a promise; `Send`, usable from worker threads
pub struct Resolver {
    state: Option<Arc<Mutex<State>>>,
}

/// Create a connected promise/resolver pair
pub fn promise() -> (Promise, Resolver) {
    let state = Arc::new(Mutex::new(State::Pending(None)));
    (
        Promise {
            state: state.clone(),
        },
        Resolver { state: Some(state) },
    )
}

impl Promise {
    /// True once a result exists (delivered or not)
    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), State::Resolved(_) | State::Delivered)
    }
}

impl ExternalFuture for Promise {
    fn subscribe(&mut self, completer: Completer) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Delivered) {
            State::Resolved(result) => completer.complete(result),
            State::Pending(_) => *state = State::Pending(Some(completer)),
            other => *state = other,
        }
    }

    fn cancel(&mut self) -> bool {
        let mut state = self.state.lock();
        match *state {
            State::Pending(_) => {
                *state = State::Cancelled;
                true
            }
            State::Cancelled => true,
            _ => false,
        }
    }
}

impl Resolver {
    /// Deliver the result. Returns false if the waiter already gave up.
    pub fn resolve(mut self, result: Resume) -> bool {
        match self.state.take() {
            Some(state) => Self::deliver(&state, result),
            None => false,
        }
    }

    fn deliver(state: &Mutex<State>, result: Resume) -> bool {
        let mut state = state.lock();
        match std::mem::replace(&mut *state, State::Delivered) {
            State::Pending(Some(completer)) => {
                completer.complete(result);
                true
            }
            State::Pending(None) => {
                *state = State::Resolved(result);
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            Self::deliver(
                &state,
                Err(TaskError::Io("promise dropped without a result".into())),
            );
        }
    }
}
