//! Sandbox error types.

use proofbridge_interop::{BridgeError, HostException};

/// Top-level error type for the sandbox crate.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The module does not export an optional entry point that was called.
    #[error("engine does not export '{0}'")]
    MissingExport(&'static str),

    /// Boundary error during a call, including exceptions raised by the
    /// engine and engine faults.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Memory operation failed (out-of-bounds, grow failure).
    #[error("memory error: {0}")]
    MemoryError(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// An earlier fault left the instance unusable.
    #[error("engine instance poisoned by earlier fault: {0}")]
    Poisoned(String),
}

impl SandboxError {
    /// Returns true if the instance that produced this error must be
    /// discarded.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Bridge(err) => err.is_fatal(),
            Self::FuelExhausted | Self::Poisoned(_) => true,
            _ => false,
        }
    }

    /// The host value raised by the engine, if this is an exception.
    pub fn exception(&self) -> Option<&HostException> {
        match self {
            Self::Bridge(BridgeError::Thrown(exn)) => Some(exn),
            _ => None,
        }
    }
}
