//! `proofbridge-interop`: the host side of the engine boundary.
//!
//! The proving engine runs as a WebAssembly module and can only exchange
//! integers and floats with the host. This crate provides everything that
//! sits on top of that:
//!
//! - `HandleTable`: arena of host values the engine refers to by index
//! - `MemoryBridge`: growth-aware typed views over linear memory
//! - `marshal`: strings, bytes and handle arrays in both directions
//! - `HostException`: exceptions crossing the boundary, identity intact
//! - `Closure`: reference-counted engine closures callable from the host
//! - `Guest`: the engine exports the above rely on
//! - `MemGuest`: in-memory `Guest` for testing
//!
//! The wasmtime-backed `Guest` lives in `proofbridge-sandbox`.

pub mod closure;
pub mod error;
pub mod exception;
pub mod guest;
pub mod handles;
pub mod marshal;
pub mod mem_guest;
pub mod memory;
pub mod value;

// Re-export commonly used types at the crate root.
pub use closure::{Closure, ClosureCall, ClosureKind};
pub use error::{BridgeError, EngineFault};
pub use exception::HostException;
pub use guest::{Bridge, Guest};
pub use handles::{Handle, HandleTable};
pub use mem_guest::MemGuest;
pub use memory::{with_ret_slot, MemoryBridge, RetSlot};
pub use value::{ErrorObject, HostRef, HostValue};
