//! `proofbridge-sandbox`: Wasmtime-based host for the proving engine.
//!
//! This crate loads, validates, and runs the proving engine's WASM module
//! and wires it to the boundary bridge from `proofbridge-interop`. It
//! provides:
//!
//! - **ABI validation:** runtime exports checked before instantiation
//! - **Import whitelisting:** only `proofbridge_host` imports, no WASI
//! - **Host imports:** strings, numbers, arrays, byte arrays, errors,
//!   reflection and closures, all addressed by handle
//! - **Fuel metering and memory limits** per instance
//! - **Fault poisoning:** an instance that trapped is never re-entered
//!
//! The primary entry points are [`Sandbox::instantiate`] and the methods of
//! [`WasmEngine`].

pub mod config;
pub mod error;
pub mod host_impl;
pub mod linker;
pub mod runtime;
pub mod validation;

pub use config::EngineConfig;
pub use error::SandboxError;
pub use host_impl::{HostState, WasmGuest};
pub use runtime::{ComposerId, KeyId, Sandbox, WasmEngine};
