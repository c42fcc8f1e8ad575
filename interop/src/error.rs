//! Boundary error types.
//!
//! `BridgeError` covers everything that can go wrong while moving values
//! across the engine boundary. Two variants are special:
//!
//! - [`BridgeError::Thrown`] carries a host value raised on the other side of
//!   the boundary. Its identity is preserved; callers can compare it against
//!   the value they raised.
//! - [`BridgeError::Fault`] means the engine itself aborted. The instance that
//!   produced it must be discarded.

use crate::exception::HostException;

/// Error type for handle, memory and marshaling operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed UTF-8 at the boundary. Never replaced lossily.
    #[error("boundary decode error: {0}")]
    Decode(#[from] std::str::Utf8Error),

    /// The per-call scratch region is full.
    #[error("scratch handle region exhausted (capacity {capacity})")]
    HandleExhaustion { capacity: u32 },

    /// Handle index was never allocated.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// Handle index refers to a freed slot.
    #[error("handle {0} used after free")]
    FreedHandle(u32),

    /// Pointer range outside the engine's linear memory.
    #[error("bad pointer: {len} bytes at {ptr} exceed linear memory of {size} bytes")]
    BadPointer { ptr: u32, len: u32, size: usize },

    /// Value behind a handle is not of the expected kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A closure was invoked while its context word was cleared.
    #[error("closure invoked recursively or after teardown")]
    ClosureDestroyed,

    /// A host value raised across the boundary.
    #[error("{0}")]
    Thrown(HostException),

    /// Unrecoverable engine abort.
    #[error(transparent)]
    Fault(#[from] EngineFault),
}

impl BridgeError {
    /// Returns true if the engine instance can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// The engine aborted execution (trap, out of fuel, allocator failure).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine fault: {message}")]
pub struct EngineFault {
    pub message: String,
}

impl EngineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
