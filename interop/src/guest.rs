//! The engine side of the boundary, as seen from the host.
//!
//! A [`Guest`] exposes the engine's linear memory together with the
//! host-side [`Bridge`] state of the same instance, plus the handful of
//! engine exports every marshaling step needs (allocator, stack pointer,
//! exception slot, closure table). The wasmtime sandbox implements it over a
//! live instance; [`MemGuest`](crate::MemGuest) implements it in memory.

use crate::closure::ClosureCall;
use crate::error::BridgeError;
use crate::handles::{HandleTable, Handle};
use crate::memory::MemoryBridge;

/// Host-side state bound to exactly one engine instance.
#[derive(Debug, Default)]
pub struct Bridge {
    pub handles: HandleTable,
    pub memory: MemoryBridge,
}

impl Bridge {
    pub fn new(scratch_capacity: u32) -> Self {
        Self {
            handles: HandleTable::new(scratch_capacity),
            memory: MemoryBridge::new(),
        }
    }
}

/// Engine exports and memory needed to marshal values.
pub trait Guest {
    /// Linear memory and bridge state, borrowed together.
    fn split(&mut self) -> (&mut [u8], &mut Bridge);

    fn malloc(&mut self, size: u32) -> Result<u32, BridgeError>;

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError>;

    fn free(&mut self, ptr: u32, size: u32) -> Result<(), BridgeError>;

    /// Move the engine's shadow stack pointer; returns the new value.
    fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, BridgeError>;

    /// Hand a host exception to the engine after a failed host import.
    fn store_exception(&mut self, handle: Handle) -> Result<(), BridgeError>;

    /// Run a closure's invoke entry.
    fn invoke_closure(&mut self, call: ClosureCall) -> Result<(), BridgeError>;

    /// Run a closure's destructor entry.
    fn destroy_closure(&mut self, dtor: u32, data: u32, vtable: u32) -> Result<(), BridgeError>;

    fn handles(&mut self) -> &mut HandleTable {
        &mut self.split().1.handles
    }
}
