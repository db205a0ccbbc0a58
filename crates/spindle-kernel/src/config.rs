//! Kernel configuration

use std::fmt;

use spindle_sdk::{TaskError, TaskId};

use crate::activation::Activation;
use crate::defaults::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_OUTCOME_CAPACITY, ENV_EVENT_CAPACITY, ENV_LOG_CRASHES,
    ENV_OUTCOME_CAPACITY,
};

/// Callback invoked on the kernel thread when a task crashes
pub type CrashHandler = Box<dyn FnMut(TaskId, &TaskError)>;

/// Options for building a [`Kernel`](crate::Kernel)
pub struct KernelConfig {
    /// Log crashed tasks at error level
    pub log_crashes: bool,

    /// Initial capacity of the readiness event buffer
    pub event_capacity: usize,

    /// Finished tasks whose outcome is kept; the oldest is forgotten first
    pub outcome_capacity: usize,

    /// Called for every crashed task, after joiners are woken
    pub crash_handler: Option<CrashHandler>,

    /// Lifecycle observers, notified in registration order
    pub activations: Vec<Box<dyn Activation>>,
}

impl KernelConfig {
    /// Defaults overridden by `SPINDLE_*` environment variables
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_LOG_CRASHES) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => config.log_crashes = false,
                "1" | "true" | "yes" | "on" => config.log_crashes = true,
                other => log::warn!("ignoring {}={:?}", ENV_LOG_CRASHES, other),
            }
        }
        if let Ok(raw) = std::env::var(ENV_EVENT_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.event_capacity = n,
                _ => log::warn!("ignoring {}={:?}", ENV_EVENT_CAPACITY, raw),
            }
        }
        if let Ok(raw) = std::env::var(ENV_OUTCOME_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.outcome_capacity = n,
                Err(_) => log::warn!("ignoring {}={:?}", ENV_OUTCOME_CAPACITY, raw),
            }
        }
        config
    }

    /// Set whether crashes are logged
    pub fn with_log_crashes(self, log_crashes: bool) -> Self {
        Self {
            log_crashes,
            ..self
        }
    }

    /// Set the initial event buffer capacity
    pub fn with_event_capacity(self, event_capacity: usize) -> Self {
        Self {
            event_capacity: event_capacity.max(1),
            ..self
        }
    }

    /// Set how many finished tasks keep their outcome (0 keeps none)
    pub fn with_outcome_capacity(self, outcome_capacity: usize) -> Self {
        Self {
            outcome_capacity,
            ..self
        }
    }

    /// Install a crash callback
    pub fn with_crash_handler(self, handler: impl FnMut(TaskId, &TaskError) + 'static) -> Self {
        Self {
            crash_handler: Some(Box::new(handler)),
            ..self
        }
    }

    /// Add a lifecycle observer
    pub fn with_activation(mut self, activation: impl Activation + 'static) -> Self {
        self.activations.push(Box::new(activation));
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_crashes: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            outcome_capacity: DEFAULT_OUTCOME_CAPACITY,
            crash_handler: None,
            activations: Vec::new(),
        }
    }
}

impl fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelConfig")
            .field("log_crashes", &self.log_crashes)
            .field("event_capacity", &self.event_capacity)
            .field("outcome_capacity", &self.outcome_capacity)
            .field("crash_handler", &self.crash_handler.is_some())
            .field("activations", &self.activations.len())
            .finish()
    }
}
