//! Spindle SDK - the contract between the kernel and the tasks it runs
//!
//! This crate provides the minimal types and traits a task needs to run on a
//! Spindle kernel without depending on the kernel itself:
//!
//! - [`Coroutine`]: the resume protocol every task implements
//! - [`Trap`]: the suspension requests a task hands back to the kernel
//! - [`Value`] / [`TaskError`]: what flows in and out of a task
//! - [`KernelHandle`] / [`Completer`]: the thread-safe wake-up surface
//! - [`Promise`]: a one-shot [`ExternalFuture`] resolvable from any thread
//!
//! # Example
//!
//! ```ignore
//! use spindle_sdk::{Resume, Step, Trap, Value};
//!
//! let mut turn = 0;
//! let task = move |_input: Resume| {
//!     turn += 1;
//!     match turn {
//!         1 => Step::Suspend(Trap::Yield),
//!         _ => Step::Return(Value::Int(42)),
//!     }
//! };
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod coroutine;
mod error;
mod handle;
mod promise;
mod trap;
mod types;
mod value;

pub use coroutine::{Coroutine, Resume, Step};
pub use error::TaskError;
pub use handle::{Completer, KernelHandle, WakeRequest, WakeSink};
pub use promise::{promise, Promise, Resolver};
pub use trap::{ExternalFuture, Interest, Trap};
pub use types::{TaskId, Token, WaitSetId};
pub use value::Value;
