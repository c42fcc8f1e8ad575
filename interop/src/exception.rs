//! Exceptions crossing the boundary in both directions.
//!
//! Host to engine: a host import that fails hands its exception to the
//! engine through [`park_exception`], which allocates a handle and calls the
//! engine's exception-store export. The import then returns a neutral value.
//!
//! Engine to host: fallible exports report `[.., err, is_err]` in their
//! return slot. [`take_thrown`] turns a set flag back into the original
//! value, so the caller receives the same object that was raised.

use std::sync::Arc;

use crate::error::BridgeError;
use crate::guest::Guest;
use crate::handles::Handle;
use crate::value::{ErrorObject, HostRef, HostValue};

/// A host value raised as an exception.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", describe(.value))]
pub struct HostException {
    value: HostRef,
}

impl HostException {
    pub fn new(value: HostRef) -> Self {
        Self { value }
    }

    /// Raise a fresh `Error` with the current stack.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Arc::new(HostValue::Error(ErrorObject::new(message))))
    }

    pub fn value(&self) -> &HostRef {
        &self.value
    }

    pub fn into_value(self) -> HostRef {
        self.value
    }

    /// Stack trace, for error-shaped values only.
    pub fn stack(&self) -> Option<&str> {
        self.value.as_error().map(|e| e.stack.as_str())
    }

    /// True if `other` is the very object that was raised.
    pub fn is(&self, other: &HostRef) -> bool {
        Arc::ptr_eq(&self.value, other)
    }
}

fn describe(value: &HostRef) -> String {
    match value.as_error() {
        Some(e) => format!("{}: {}", e.name, e.message),
        None => format!("uncaught {}", value.debug_string()),
    }
}

/// Store a failed host import's exception in the engine. Returns `None` in
/// that case so the import can return its neutral value.
pub fn park_exception<G, T>(guest: &mut G, result: Result<T, HostException>) -> Result<Option<T>, BridgeError>
where
    G: Guest + ?Sized,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(exn) => {
            tracing::debug!(exception = %exn, "parking host exception in engine");
            let handle = guest.handles().allocate(exn.into_value());
            guest.store_exception(handle)?;
            Ok(None)
        }
    }
}

/// Re-raise the exception reported by an `[err, is_err]` word pair.
pub fn take_thrown<G: Guest + ?Sized>(guest: &mut G, err: i32, is_err: i32) -> Result<(), BridgeError> {
    if is_err == 0 {
        return Ok(());
    }
    let value = guest.handles().take(Handle::from_abi(err))?;
    Err(BridgeError::Thrown(HostException::new(value)))
}
