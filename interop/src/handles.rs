//! Handle table: the arena that owns every host value the engine can see.
//!
//! Layout of the index space:
//!
//! ```text
//! 0..4                  undefined, null, true, false (permanent)
//! 4..4+C                scratch region, LIFO, one-call borrows
//! 4+C..                 heap, free-list managed
//! ```
//!
//! A freed heap slot stores the index of the next free slot, so the free
//! list costs no extra memory. The scratch stack pointer starts at `4+C`
//! and moves down on borrow.

use crate::error::BridgeError;
use crate::value::{HostRef, HostValue};

pub const UNDEFINED: Handle = Handle(0);
pub const NULL: Handle = Handle(1);
pub const TRUE: Handle = Handle(2);
pub const FALSE: Handle = Handle(3);

/// Number of permanent constant slots.
pub const RESERVED_CONSTANTS: u32 = 4;

/// Default capacity of the scratch region.
pub const DEFAULT_SCRATCH_CAPACITY: u32 = 32;

/// Opaque index into a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }

    /// Handle as the `i32` the engine ABI passes around.
    pub const fn as_abi(self) -> i32 {
        self.0 as i32
    }

    pub const fn from_abi(raw: i32) -> Self {
        Self(raw as u32)
    }
}

#[derive(Debug)]
enum Slot {
    Occupied(HostRef),
    /// Heap slot on the free list; holds the next free index.
    Free(u32),
    /// Empty scratch slot.
    Vacant,
}

/// Arena mapping handles to host values for one engine instance.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Slot>,
    next_free: u32,
    stack_pointer: u32,
    scratch_capacity: u32,
    live: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_CAPACITY)
    }
}

impl HandleTable {
    pub fn new(scratch_capacity: u32) -> Self {
        let mut slots = Vec::with_capacity((RESERVED_CONSTANTS + scratch_capacity) as usize + 32);
        slots.push(Slot::Occupied(HostValue::undefined()));
        slots.push(Slot::Occupied(HostValue::null()));
        slots.push(Slot::Occupied(HostValue::bool(true)));
        slots.push(Slot::Occupied(HostValue::bool(false)));
        slots.extend((0..scratch_capacity).map(|_| Slot::Vacant));

        let heap_base = RESERVED_CONSTANTS + scratch_capacity;
        Self {
            slots,
            next_free: heap_base,
            stack_pointer: heap_base,
            scratch_capacity,
            live: 0,
        }
    }

    /// First index managed by the free list.
    pub fn heap_base(&self) -> u32 {
        RESERVED_CONSTANTS + self.scratch_capacity
    }

    pub fn scratch_capacity(&self) -> u32 {
        self.scratch_capacity
    }

    /// Number of occupied heap slots.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of scratch slots currently borrowed.
    pub fn borrowed(&self) -> u32 {
        self.heap_base() - self.stack_pointer
    }

    /// Store a value, reusing the head of the free list if there is one.
    pub fn allocate(&mut self, value: HostRef) -> Handle {
        if self.next_free as usize == self.slots.len() {
            self.slots.push(Slot::Free(self.next_free + 1));
        }
        let index = self.next_free;
        let previous = std::mem::replace(&mut self.slots[index as usize], Slot::Occupied(value));
        self.next_free = match previous {
            Slot::Free(next) => next,
            // The cursor only ever points at free heap slots or one past the end.
            _ => self.slots.len() as u32,
        };
        self.live += 1;
        Handle(index)
    }

    /// Handle for a boolean constant; never allocates.
    pub fn bool_handle(value: bool) -> Handle {
        if value {
            TRUE
        } else {
            FALSE
        }
    }

    /// Read a value without changing ownership.
    pub fn get(&self, handle: Handle) -> Result<HostRef, BridgeError> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(value)) => Ok(value.clone()),
            Some(Slot::Free(_)) | Some(Slot::Vacant) => Err(BridgeError::FreedHandle(handle.0)),
            None => Err(BridgeError::InvalidHandle(handle.0)),
        }
    }

    /// Read a value and release the handle.
    pub fn take(&mut self, handle: Handle) -> Result<HostRef, BridgeError> {
        let value = self.get(handle)?;
        self.free(handle)?;
        Ok(value)
    }

    /// Release a heap handle. Constants and scratch slots are left alone.
    pub fn free(&mut self, handle: Handle) -> Result<(), BridgeError> {
        if handle.0 < self.heap_base() {
            return Ok(());
        }
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(_)) => {
                self.slots[handle.0 as usize] = Slot::Free(self.next_free);
                self.next_free = handle.0;
                self.live -= 1;
                Ok(())
            }
            Some(_) => Err(BridgeError::FreedHandle(handle.0)),
            None => Err(BridgeError::InvalidHandle(handle.0)),
        }
    }

    /// Second handle to the same value with its own lifetime.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, BridgeError> {
        let value = self.get(handle)?;
        Ok(self.allocate(value))
    }

    /// Push a value into the scratch region for the duration of one call.
    ///
    /// Every successful borrow must be paired with [`release_borrowed`]
    /// on all exit paths of the call.
    ///
    /// [`release_borrowed`]: HandleTable::release_borrowed
    pub fn borrow(&mut self, value: HostRef) -> Result<Handle, BridgeError> {
        if self.stack_pointer == RESERVED_CONSTANTS {
            return Err(BridgeError::HandleExhaustion {
                capacity: self.scratch_capacity,
            });
        }
        self.stack_pointer -= 1;
        self.slots[self.stack_pointer as usize] = Slot::Occupied(value);
        Ok(Handle(self.stack_pointer))
    }

    /// Pop the most recent borrow.
    pub fn release_borrowed(&mut self) {
        if self.stack_pointer < self.heap_base() {
            self.slots[self.stack_pointer as usize] = Slot::Vacant;
            self.stack_pointer += 1;
        }
    }
}
