//! Spindle scheduling kernel
//!
//! A single-threaded event loop for cooperative tasks. Tasks are
//! [`Coroutine`]s that run until they suspend with a [`Trap`]; the kernel
//! interleaves them with I/O readiness, timers, OS signals and wake-ups from
//! other threads, and provides cancellation, timeouts and orderly shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────── Kernel ──────────────────────────────┐
//! │ task table ─ ready queue ─ timer heap ─ wait sets ─ outcomes        │
//! │      │                                                             │
//! │      ├── Selector (poll) ◄── doorbell socket ◄── KernelHandle::wake │
//! │      │                           ▲                  (any thread)   │
//! │      └── SignalRouter ───────────┘ signal handler                  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use spindle_kernel::{Kernel, Resume, Step, Trap, Value};
//!
//! let mut kernel = Kernel::new();
//! let mut slept = false;
//! let value = kernel.block_on(move |_: Resume| {
//!     if !slept {
//!         slept = true;
//!         return Step::Suspend(Trap::Sleep(std::time::Duration::from_millis(5)));
//!     }
//!     Step::Return(Value::Int(42))
//! })?;
//! ```

#![warn(missing_docs)]

pub mod activation;
pub mod config;
pub mod defaults;
pub mod error;
mod kernel;
mod outcome;
pub mod ready;
pub mod selector;
mod signal;
pub mod task;
#[cfg(test)]
pub(crate) mod testing;
pub mod timer;
mod wake;

pub use activation::{Activation, TraceActivation};
pub use config::{CrashHandler, KernelConfig};
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelStats};
pub use selector::{Event, PollSelector, Selector};
pub use task::{Outcome, TaskState, WaitState};

pub use spindle_sdk::{
    promise, Completer, Coroutine, ExternalFuture, Interest, KernelHandle, Promise, Resolver,
    Resume, Step, TaskError, TaskId, Token, Trap, Value, WaitSetId,
};
