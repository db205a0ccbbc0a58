//! Scripted tasks shared by the unit and integration tests
//!
//! Depends on nothing but `spindle_sdk`, so the integration tests can pull
//! the same file in with `#[path]`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use spindle_sdk::{Coroutine, Resume, Step, Trap, Value};

/// Results a [`Script`] was resumed with
pub type Seen = Rc<RefCell<Vec<Resume>>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn seen() -> Seen {
    Rc::new(RefCell::new(Vec::new()))
}

/// Issues its traps in order and records every result
///
/// The first error it is resumed with is raised; otherwise it returns the
/// last value it received.
pub struct Script {
    traps: VecDeque<Trap>,
    seen: Seen,
    last: Value,
    started: bool,
}

impl Script {
    pub fn new(traps: Vec<Trap>, seen: &Seen) -> Self {
        Self {
            traps: traps.into(),
            seen: seen.clone(),
            last: Value::None,
            started: false,
        }
    }

    /// A script whose results nobody looks at
    pub fn blind(traps: Vec<Trap>) -> Self {
        Self::new(traps, &seen())
    }
}

impl Coroutine for Script {
    fn resume(&mut self, input: Resume) -> Step {
        if self.started {
            self.seen.borrow_mut().push(input.clone());
            match input {
                Ok(value) => self.last = value,
                Err(e) => return Step::Raise(e),
            }
        }
        self.started = true;
        match self.traps.pop_front() {
            Some(trap) => Step::Suspend(trap),
            None => Step::Return(std::mem::take(&mut self.last)),
        }
    }
}
