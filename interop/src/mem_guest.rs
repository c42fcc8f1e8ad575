//! In-memory engine stand-in for testing.
//!
//! `MemGuest` implements [`Guest`] over a plain byte vector: the low
//! [`STACK_SIZE`] bytes are the shadow stack, a bump allocator hands out
//! the rest and grows the vector a page at a time. Closure invoke entries
//! are registered as Rust functions. Useful for unit tests and for callers
//! that need the marshaling layer without a wasm instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::closure::ClosureCall;
use crate::error::{BridgeError, EngineFault};
use crate::guest::{Bridge, Guest};
use crate::handles::{Handle, DEFAULT_SCRATCH_CAPACITY};
use crate::memory;

pub const PAGE_SIZE: usize = 65536;
pub const STACK_SIZE: u32 = 16 * 1024;

/// Invoke entry of a registered closure.
pub type InvokeFn = Arc<dyn Fn(&mut MemGuest, ClosureCall) -> Result<(), BridgeError> + Send + Sync>;

fn align8(size: usize) -> usize {
    (size + 7) & !7
}

pub struct MemGuest {
    memory: Vec<u8>,
    bridge: Bridge,
    stack_pointer: u32,
    bump: u32,
    /// Live allocations: pointer to requested size.
    allocations: BTreeMap<u32, u32>,
    exceptions: Vec<Handle>,
    invokes: BTreeMap<u32, InvokeFn>,
    destroyed: Vec<(u32, u32, u32)>,
}

impl fmt::Debug for MemGuest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemGuest")
            .field("memory_len", &self.memory.len())
            .field("stack_pointer", &self.stack_pointer)
            .field("allocations", &self.allocations.len())
            .field("exceptions", &self.exceptions)
            .finish_non_exhaustive()
    }
}

impl Default for MemGuest {
    fn default() -> Self {
        Self::new()
    }
}

impl MemGuest {
    pub fn new() -> Self {
        Self::with_scratch_capacity(DEFAULT_SCRATCH_CAPACITY)
    }

    pub fn with_scratch_capacity(capacity: u32) -> Self {
        Self {
            memory: vec![0; PAGE_SIZE],
            bridge: Bridge::new(capacity),
            stack_pointer: STACK_SIZE,
            bump: STACK_SIZE,
            allocations: BTreeMap::new(),
            exceptions: Vec::new(),
            invokes: BTreeMap::new(),
            destroyed: Vec::new(),
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn stack_pointer(&self) -> u32 {
        self.stack_pointer
    }

    /// Requested size of a live allocation.
    pub fn allocation_size(&self, ptr: u32) -> Option<u32> {
        self.allocations.get(&ptr).copied()
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Handles handed over through the exception-store entry, oldest first.
    pub fn exceptions(&self) -> &[Handle] {
        &self.exceptions
    }

    /// Destructor calls as `(dtor, data, vtable)`.
    pub fn destroyed(&self) -> &[(u32, u32, u32)] {
        &self.destroyed
    }

    pub fn register_invoke(&mut self, index: u32, f: InvokeFn) {
        self.invokes.insert(index, f);
    }

    fn fault(message: impl Into<String>) -> BridgeError {
        BridgeError::Fault(EngineFault::new(message))
    }
}

impl Guest for MemGuest {
    fn split(&mut self) -> (&mut [u8], &mut Bridge) {
        (&mut self.memory, &mut self.bridge)
    }

    fn malloc(&mut self, size: u32) -> Result<u32, BridgeError> {
        let aligned = align8(size.max(1) as usize);
        let ptr = self.bump;
        let end = (ptr as usize)
            .checked_add(aligned)
            .filter(|end| *end <= u32::MAX as usize)
            .ok_or_else(|| Self::fault(format!("allocation of {} bytes overflows memory", size)))?;
        if end > self.memory.len() {
            let pages = (end - self.memory.len()).div_ceil(PAGE_SIZE);
            self.memory.resize(self.memory.len() + pages * PAGE_SIZE, 0);
        }
        self.bump = end as u32;
        self.allocations.insert(ptr, size);
        Ok(ptr)
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError> {
        let new_ptr = self.malloc(new_size)?;
        let keep = old_size.min(new_size) as usize;
        let (start, _) = memory::check_range(self.memory.len(), ptr, keep as u32)?;
        self.memory.copy_within(start..start + keep, new_ptr as usize);
        self.free(ptr, old_size)?;
        Ok(new_ptr)
    }

    fn free(&mut self, ptr: u32, _size: u32) -> Result<(), BridgeError> {
        self.allocations
            .remove(&ptr)
            .map(|_| ())
            .ok_or_else(|| Self::fault(format!("free of unknown pointer {:#x}", ptr)))
    }

    fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, BridgeError> {
        let next = self.stack_pointer as i64 + delta as i64;
        if !(0..=STACK_SIZE as i64).contains(&next) {
            return Err(Self::fault(format!("stack pointer out of range: {}", next)));
        }
        self.stack_pointer = next as u32;
        Ok(self.stack_pointer)
    }

    fn store_exception(&mut self, handle: Handle) -> Result<(), BridgeError> {
        self.exceptions.push(handle);
        Ok(())
    }

    fn invoke_closure(&mut self, call: ClosureCall) -> Result<(), BridgeError> {
        let f = self
            .invokes
            .get(&call.invoke)
            .cloned()
            .ok_or_else(|| Self::fault(format!("no invoke entry at table index {}", call.invoke)))?;
        f(self, call)
    }

    fn destroy_closure(&mut self, dtor: u32, data: u32, vtable: u32) -> Result<(), BridgeError> {
        self.destroyed.push((dtor, data, vtable));
        Ok(())
    }
}
