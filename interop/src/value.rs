//! Host-side values referenced from the engine by handle.
//!
//! Values are shared through [`HostRef`] (`Arc<HostValue>`). Cloning a
//! `HostRef` shares identity, which is what lets a thrown value come back
//! out of the engine as the very same object.

use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::closure::Closure;
use crate::error::BridgeError;

/// Shared reference to a host value.
pub type HostRef = Arc<HostValue>;

/// A value owned by the host and visible to the engine only as a handle.
#[derive(Debug)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Mutex<Vec<HostRef>>),
    Json(serde_json::Value),
    Error(ErrorObject),
    Closure(Closure),
    /// The engine's own linear memory, as returned by the `memory` import.
    Memory,
}

/// An error-shaped host value with a captured stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObject {
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl ErrorObject {
    /// Create an `Error` and capture the current stack.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: Backtrace::capture().to_string(),
        }
    }
}

impl HostValue {
    pub fn undefined() -> HostRef {
        Arc::new(Self::Undefined)
    }

    pub fn null() -> HostRef {
        Arc::new(Self::Null)
    }

    pub fn bool(value: bool) -> HostRef {
        Arc::new(Self::Bool(value))
    }

    pub fn number(value: f64) -> HostRef {
        Arc::new(Self::Number(value))
    }

    pub fn string(value: impl Into<String>) -> HostRef {
        Arc::new(Self::String(value.into()))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> HostRef {
        Arc::new(Self::Bytes(value.into()))
    }

    pub fn array(items: Vec<HostRef>) -> HostRef {
        Arc::new(Self::Array(Mutex::new(items)))
    }

    pub fn json(value: serde_json::Value) -> HostRef {
        Arc::new(Self::Json(value))
    }

    pub fn error(message: impl Into<String>) -> HostRef {
        Arc::new(Self::Error(ErrorObject::new(message)))
    }

    /// Short kind name used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Json(_) => "object",
            Self::Error(_) => "error",
            Self::Closure(_) => "function",
            Self::Memory => "memory",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorObject> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], BridgeError> {
        match self {
            Self::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", other)),
        }
    }

    pub fn as_closure(&self) -> Result<&Closure, BridgeError> {
        match self {
            Self::Closure(c) => Ok(c),
            other => Err(mismatch("function", other)),
        }
    }

    /// Lock the elements of an array value.
    pub fn items(&self) -> Result<MutexGuard<'_, Vec<HostRef>>, BridgeError> {
        match self {
            Self::Array(items) => Ok(items.lock().unwrap_or_else(PoisonError::into_inner)),
            other => Err(mismatch("array", other)),
        }
    }

    /// Serialize to JSON the way the engine expects circuit descriptions.
    ///
    /// `undefined` serializes as `null`. An array that contains itself
    /// is a type mismatch.
    pub fn to_json(&self) -> Result<serde_json::Value, BridgeError> {
        self.to_json_within(&mut Vec::new())
    }

    fn to_json_within(&self, open: &mut Vec<*const HostValue>) -> Result<serde_json::Value, BridgeError> {
        use serde_json::Value;

        Ok(match self {
            Self::Undefined | Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
            Self::Array(_) => {
                let id: *const HostValue = self;
                if open.contains(&id) {
                    return Err(BridgeError::TypeMismatch {
                        expected: "acyclic value",
                        found: "circular array",
                    });
                }
                let items = self.items()?.clone();
                open.push(id);
                let out = items
                    .iter()
                    .map(|item| item.to_json_within(open))
                    .collect::<Result<_, _>>();
                open.pop();
                Value::Array(out?)
            }
            Self::Json(v) => v.clone(),
            Self::Error(_) => Value::Object(serde_json::Map::new()),
            other => return Err(mismatch("serializable value", other)),
        })
    }

    /// Render any value for diagnostics, in the shape guest panic
    /// messages expect. A nested reference to an enclosing array renders
    /// as `[Circular]`.
    pub fn debug_string(&self) -> String {
        self.debug_string_within(&mut Vec::new())
    }

    fn debug_string_within(&self, open: &mut Vec<*const HostValue>) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::String(s) => format!("{:?}", s),
            Self::Bytes(b) => format!("Uint8Array({})", b.len()),
            Self::Array(items) => {
                let id: *const HostValue = self;
                if open.contains(&id) {
                    return "[Circular]".into();
                }
                let items = items.lock().unwrap_or_else(PoisonError::into_inner).clone();
                open.push(id);
                let parts: Vec<String> = items.iter().map(|v| v.debug_string_within(open)).collect();
                open.pop();
                format!("[{}]", parts.join(", "))
            }
            Self::Json(v) => format!("Object({})", v),
            Self::Error(e) => format!("{}: {}\n{}", e.name, e.message, e.stack),
            Self::Closure(_) => "Function".into(),
            Self::Memory => "Memory".into(),
        }
    }
}

pub(crate) fn mismatch(expected: &'static str, found: &HostValue) -> BridgeError {
    BridgeError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}
