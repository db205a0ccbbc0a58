//! Shared helpers for kernel integration tests

#![allow(unused_imports)]

#[path = "../../src/testing.rs"]
mod testing;

pub use testing::{init_logging, seen, Script, Seen};
