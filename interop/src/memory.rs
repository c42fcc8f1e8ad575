//! Linear memory access: bounds-checked helpers, typed views and the
//! scratch return slot.
//!
//! The engine's memory can grow during any call into it. A view built
//! before the growth describes a buffer that no longer exists, so views are
//! cached by length and rebuilt lazily: growth zeroes every cached length,
//! and [`MemoryBridge::ensure_views`] rebuilds whichever are zero. Views
//! borrow the memory slice, so one cannot outlive a call that may grow it.

use std::marker::PhantomData;

use crate::error::BridgeError;
use crate::guest::Guest;

/// Bytes reserved on the engine stack for multi-word results.
pub const RET_SLOT_SIZE: i32 = 16;

/// Validate `[ptr, ptr+len)` against a memory of `size` bytes.
pub fn check_range(size: usize, ptr: u32, len: u32) -> Result<(usize, usize), BridgeError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .ok_or(BridgeError::BadPointer { ptr, len, size })?;
    Ok((start, end))
}

/// Borrow `len` bytes of memory at `ptr` without copying.
pub fn read_bytes(mem: &[u8], ptr: u32, len: u32) -> Result<&[u8], BridgeError> {
    let (start, end) = check_range(mem.len(), ptr, len)?;
    Ok(&mem[start..end])
}

/// Copy `data` into memory at `ptr`.
pub fn write_bytes(mem: &mut [u8], ptr: u32, data: &[u8]) -> Result<(), BridgeError> {
    let (start, end) = check_range(mem.len(), ptr, data.len() as u32)?;
    mem[start..end].copy_from_slice(data);
    Ok(())
}

/// Fixed-width little-endian element of a typed view.
pub trait Element: Copy {
    const WIDTH: usize;
    /// Slot in the view cache.
    const KIND: usize;
    fn decode(bytes: &[u8]) -> Self;
    fn encode(self, out: &mut [u8]);
}

macro_rules! element {
    ($ty:ty, $width:expr, $kind:expr) => {
        impl Element for $ty {
            const WIDTH: usize = $width;
            const KIND: usize = $kind;

            fn decode(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_le_bytes(buf)
            }

            fn encode(self, out: &mut [u8]) {
                out[..$width].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

element!(u8, 1, 0);
element!(i32, 4, 1);
element!(u32, 4, 2);
element!(f64, 8, 3);

const VIEW_KINDS: usize = 4;

/// Typed window over linear memory, indexed in elements.
pub struct View<'m, T: Element> {
    bytes: &'m mut [u8],
    len: usize,
    _element: PhantomData<T>,
}

impl<'m, T: Element> View<'m, T> {
    /// Number of whole elements visible through this view.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<T, BridgeError> {
        let start = self.offset(index)?;
        Ok(T::decode(&self.bytes[start..start + T::WIDTH]))
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<(), BridgeError> {
        let start = self.offset(index)?;
        value.encode(&mut self.bytes[start..start + T::WIDTH]);
        Ok(())
    }

    fn offset(&self, index: usize) -> Result<usize, BridgeError> {
        if index >= self.len {
            return Err(BridgeError::BadPointer {
                ptr: (index * T::WIDTH) as u32,
                len: T::WIDTH as u32,
                size: self.bytes.len(),
            });
        }
        Ok(index * T::WIDTH)
    }
}

impl<'m> View<'m, u8> {
    /// Sub-slice of the byte view.
    pub fn subarray(&mut self, ptr: u32, len: u32) -> Result<&mut [u8], BridgeError> {
        let (start, end) = check_range(self.len, ptr, len)?;
        Ok(&mut self.bytes[start..end])
    }
}

/// Per-instance view cache plus the "last written length" register used by
/// the marshaler.
#[derive(Debug, Default)]
pub struct MemoryBridge {
    buffer_len: usize,
    view_lens: [usize; VIEW_KINDS],
    rebuilds: u64,
    vector_len: u32,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild any view whose cached length is zero.
    ///
    /// A buffer whose size changed since the last call is treated as
    /// reallocated: every cached view is detached first.
    pub fn ensure_views(&mut self, mem: &[u8]) {
        if mem.len() != self.buffer_len {
            self.view_lens = [0; VIEW_KINDS];
            self.buffer_len = mem.len();
        }
        let widths = [1usize, 4, 4, 8];
        for (cached, width) in self.view_lens.iter_mut().zip(widths) {
            if *cached == 0 && mem.len() >= width {
                *cached = mem.len() / width;
                self.rebuilds += 1;
            }
        }
    }

    /// Drop all cached views, as after a buffer reallocation.
    pub fn detach(&mut self) {
        self.view_lens = [0; VIEW_KINDS];
    }

    /// How many times a view has been (re)built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Cached element count of a view, zero when stale.
    pub fn cached_len<T: Element>(&self) -> usize {
        self.view_lens[T::KIND]
    }

    pub fn view<'m, T: Element>(&mut self, mem: &'m mut [u8]) -> View<'m, T> {
        self.ensure_views(mem);
        View {
            len: self.view_lens[T::KIND],
            bytes: mem,
            _element: PhantomData,
        }
    }

    /// Record the byte or element count of the last encoded value.
    pub fn set_vector_len(&mut self, len: u32) {
        self.vector_len = len;
    }

    pub fn vector_len(&self) -> u32 {
        self.vector_len
    }
}

/// Block on the engine stack through which a call returns its result words.
#[derive(Debug, Clone, Copy)]
pub struct RetSlot {
    ptr: u32,
}

impl RetSlot {
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// The return slot address as the `i32` argument the engine expects.
    pub fn as_abi(&self) -> i32 {
        self.ptr as i32
    }

    /// Wrap an address supplied by the engine (host imports that write
    /// their results through a caller-owned slot).
    pub fn at(ptr: i32) -> Self {
        Self { ptr: ptr as u32 }
    }

    /// Read the `index`th 32-bit word.
    pub fn word<G: Guest + ?Sized>(&self, guest: &mut G, index: usize) -> Result<i32, BridgeError> {
        let (mem, bridge) = guest.split();
        bridge.memory.view::<i32>(mem).get(self.ptr as usize / 4 + index)
    }

    pub fn set_word<G: Guest + ?Sized>(
        &self,
        guest: &mut G,
        index: usize,
        value: i32,
    ) -> Result<(), BridgeError> {
        let (mem, bridge) = guest.split();
        bridge.memory.view::<i32>(mem).set(self.ptr as usize / 4 + index, value)
    }

    /// Read the `index`th 64-bit float.
    pub fn float<G: Guest + ?Sized>(&self, guest: &mut G, index: usize) -> Result<f64, BridgeError> {
        let (mem, bridge) = guest.split();
        bridge.memory.view::<f64>(mem).get(self.ptr as usize / 8 + index)
    }

    pub fn set_float<G: Guest + ?Sized>(
        &self,
        guest: &mut G,
        index: usize,
        value: f64,
    ) -> Result<(), BridgeError> {
        let (mem, bridge) = guest.split();
        bridge.memory.view::<f64>(mem).set(self.ptr as usize / 8 + index, value)
    }
}

/// Reserve a return slot, run `f`, and restore the engine stack pointer
/// whatever `f` returns.
pub fn with_ret_slot<G, R, F>(guest: &mut G, f: F) -> Result<R, BridgeError>
where
    G: Guest + ?Sized,
    F: FnOnce(&mut G, RetSlot) -> Result<R, BridgeError>,
{
    let ptr = guest.add_to_stack_pointer(-RET_SLOT_SIZE)?;
    let result = f(guest, RetSlot { ptr });
    let restored = guest.add_to_stack_pointer(RET_SLOT_SIZE);
    match (result, restored) {
        (Ok(value), Ok(_)) => Ok(value),
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err),
    }
}
