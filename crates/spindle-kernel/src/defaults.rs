//! Default constants for kernel configuration.

use std::time::Duration;

/// Initial capacity of the readiness event buffer reused across polls.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Doorbell byte written by cross-thread wake-ups. Signal deliveries write
/// the signal number instead, which is never zero.
pub const WAKE_BYTE: u8 = 0;

/// Bytes drained from the doorbell per read call.
pub const DOORBELL_READ_CHUNK: usize = 1024;

/// Highest signal number that fits in a doorbell byte.
pub const MAX_SIGNAL: i32 = u8::MAX as i32;

/// Finished tasks whose outcome is remembered for late joiners and queries.
pub const DEFAULT_OUTCOME_CAPACITY: usize = 1024;

/// Environment variable toggling crash logging (`0`/`false` disables).
pub const ENV_LOG_CRASHES: &str = "SPINDLE_LOG_CRASHES";

/// Environment variable overriding [`DEFAULT_EVENT_CAPACITY`].
pub const ENV_EVENT_CAPACITY: &str = "SPINDLE_EVENT_CAPACITY";

/// Environment variable overriding [`DEFAULT_OUTCOME_CAPACITY`].
pub const ENV_OUTCOME_CAPACITY: &str = "SPINDLE_OUTCOME_CAPACITY";

/// Longest sleep honoured; longer ones are clamped so the deadline stays
/// representable.
pub const MAX_SLEEP: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
