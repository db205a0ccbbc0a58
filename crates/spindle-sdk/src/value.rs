//! Values exchanged between tasks, the kernel and wake-up sources
//!
//! A `Value` is what a task receives when it is resumed and what it returns
//! when it finishes. Values cross thread boundaries through the wake channel,
//! so every variant is `Send`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::handle::KernelHandle;
use crate::types::{TaskId, WaitSetId};

/// Value delivered to or produced by a task
#[derive(Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// A task identity
    Task(TaskId),
    /// A kernel wait set
    WaitSet(WaitSetId),
    /// An OS signal number
    Signal(i32),
    /// A point on the kernel's monotonic clock
    Instant(Instant),
    /// An optional deadline (timeout queries)
    Deadline(Option<Instant>),
    /// Ordered collection of values
    List(Vec<Value>),
    /// Thread-safe handle to the kernel running the task
    Kernel(KernelHandle),
    /// Arbitrary shared payload
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Check if this is `Value::None`
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Get as boolean if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as task id if this is a task
    pub fn as_task(&self) -> Option<TaskId> {
        match self {
            Value::Task(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as wait set id
    pub fn as_wait_set(&self) -> Option<WaitSetId> {
        match self {
            Value::WaitSet(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as signal number
    pub fn as_signal(&self) -> Option<i32> {
        match self {
            Value::Signal(signo) => Some(*signo),
            _ => None,
        }
    }

    /// Get as instant
    pub fn as_instant(&self) -> Option<Instant> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }

    /// Get as deadline. `None` means the value is not a deadline at all.
    pub fn as_deadline(&self) -> Option<Option<Instant>> {
        match self {
            Value::Deadline(d) => Some(*d),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get as kernel handle
    pub fn as_kernel(&self) -> Option<&KernelHandle> {
        match self {
            Value::Kernel(handle) => Some(handle),
            _ => None,
        }
    }

    /// Downcast a shared payload
    pub fn downcast_shared<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Shared(payload) => payload.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Task(_) => "task",
            Value::WaitSet(_) => "wait_set",
            Value::Signal(_) => "signal",
            Value::Instant(_) => "instant",
            Value::Deadline(_) => "deadline",
            Value::List(_) => "list",
            Value::Kernel(_) => "kernel",
            Value::Shared(_) => "shared",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Task(id) => write!(f, "Task({})", id),
            Value::WaitSet(id) => write!(f, "WaitSet({})", id.as_u64()),
            Value::Signal(signo) => write!(f, "Signal({})", signo),
            Value::Instant(t) => write!(f, "Instant({:?})", t),
            Value::Deadline(d) => write!(f, "Deadline({:?})", d),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Kernel(_) => write!(f, "Kernel(..)"),
            Value::Shared(_) => write!(f, "Shared(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a == b,
            (Value::WaitSet(a), Value::WaitSet(b)) => a == b,
            (Value::Signal(a), Value::Signal(b)) => a == b,
            (Value::Instant(a), Value::Instant(b)) => a == b,
            (Value::Deadline(a), Value::Deadline(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Shared(a), Value::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<TaskId> for Value {
    fn from(id: TaskId) -> Self {
        Value::Task(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_variants() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Bool(true).as_int(), None);
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert!(Value::default().is_none());
        assert_eq!(Value::Deadline(None).as_deadline(), Some(None));
        assert_eq!(Value::Int(1).as_deadline(), None);
    }

    #[test]
    fn test_shared_payload_downcast() {
        let payload: Arc<dyn Any + Send + Sync> = Arc::new(17u32);
        let value = Value::Shared(payload);
        assert_eq!(value.downcast_shared::<u32>().as_deref(), Some(&17));
        assert!(value.downcast_shared::<String>().is_none());
        assert_eq!(value.clone(), value);
    }
}
