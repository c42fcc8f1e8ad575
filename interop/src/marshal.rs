//! Moving strings, byte arrays and handle arrays across the boundary.
//!
//! Every `pass_*` function allocates in the engine and returns
//! `(ptr, len)`; the engine owns the buffer afterward. Every `get_*`
//! function copies out of engine memory before returning, because the
//! source bytes may move on the next call that grows memory.

use crate::error::BridgeError;
use crate::guest::Guest;
use crate::memory::{self, RetSlot};
use crate::value::{HostRef, HostValue};

/// Encode `text` as UTF-8 into a fresh engine buffer.
///
/// The buffer is first sized to the UTF-16 length of `text` and filled
/// with ASCII bytes directly. At the first non-ASCII character the buffer
/// is reallocated to the worst case for the remainder (three bytes per
/// UTF-16 unit) and the remainder is encoded in one go. The final length
/// goes through the bridge's last-written-length register.
pub fn pass_string<G: Guest + ?Sized>(guest: &mut G, text: &str) -> Result<(u32, u32), BridgeError> {
    let units = text.encode_utf16().count() as u32;
    let mut ptr = guest.malloc(units)?;

    let bytes = text.as_bytes();
    let mut offset = 0usize;
    {
        let (mem, bridge) = guest.split();
        let mut view = bridge.memory.view::<u8>(mem);
        let dest = view.subarray(ptr, units)?;
        while offset < bytes.len() && bytes[offset].is_ascii() {
            dest[offset] = bytes[offset];
            offset += 1;
        }
    }

    if offset != bytes.len() {
        let rest = &text[offset..];
        let capacity = offset as u32 + rest.encode_utf16().count() as u32 * 3;
        ptr = guest.realloc(ptr, units, capacity)?;

        let (mem, bridge) = guest.split();
        let mut view = bridge.memory.view::<u8>(mem);
        let dest = view.subarray(ptr + offset as u32, capacity - offset as u32)?;
        offset += encode_into(rest, dest);
    }

    let (_, bridge) = guest.split();
    bridge.memory.set_vector_len(offset as u32);
    Ok((ptr, bridge.memory.vector_len()))
}

/// UTF-8 encode as much of `text` as fits; returns bytes written.
fn encode_into(text: &str, dest: &mut [u8]) -> usize {
    let mut written = 0;
    for ch in text.chars() {
        let width = ch.len_utf8();
        if written + width > dest.len() {
            break;
        }
        ch.encode_utf8(&mut dest[written..written + width]);
        written += width;
    }
    written
}

/// Decode strict UTF-8 from engine memory.
pub fn get_string<G: Guest + ?Sized>(guest: &mut G, ptr: u32, len: u32) -> Result<String, BridgeError> {
    let (mem, _) = guest.split();
    let bytes = memory::read_bytes(mem, ptr, len)?;
    Ok(std::str::from_utf8(bytes)?.to_owned())
}

/// Copy bytes into a fresh engine buffer.
pub fn pass_bytes<G: Guest + ?Sized>(guest: &mut G, data: &[u8]) -> Result<(u32, u32), BridgeError> {
    let ptr = guest.malloc(data.len() as u32)?;
    let (mem, bridge) = guest.split();
    bridge.memory.view::<u8>(mem).subarray(ptr, data.len() as u32)?.copy_from_slice(data);
    bridge.memory.set_vector_len(data.len() as u32);
    Ok((ptr, bridge.memory.vector_len()))
}

/// Copy bytes out of engine memory.
pub fn get_bytes<G: Guest + ?Sized>(guest: &mut G, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
    let (mem, _) = guest.split();
    Ok(memory::read_bytes(mem, ptr, len)?.to_vec())
}

/// Allocate a handle per value and write the handles as 32-bit words.
///
/// Returns the buffer pointer and the element count.
pub fn pass_handle_array<G: Guest + ?Sized>(
    guest: &mut G,
    values: &[HostRef],
) -> Result<(u32, u32), BridgeError> {
    let ptr = guest.malloc(values.len() as u32 * 4)?;
    let (mem, bridge) = guest.split();
    let mut view = bridge.memory.view::<u32>(mem);
    for (i, value) in values.iter().enumerate() {
        let handle = bridge.handles.allocate(value.clone());
        view.set(ptr as usize / 4 + i, handle.index())?;
    }
    bridge.memory.set_vector_len(values.len() as u32);
    Ok((ptr, bridge.memory.vector_len()))
}

/// Pass a list of strings as an array of string handles.
pub fn pass_string_array<G: Guest + ?Sized, S: AsRef<str>>(
    guest: &mut G,
    strings: &[S],
) -> Result<(u32, u32), BridgeError> {
    let values: Vec<HostRef> = strings
        .iter()
        .map(|s| HostValue::string(s.as_ref()))
        .collect();
    pass_handle_array(guest, &values)
}

/// Read a `[ptr, len]` byte result from a return slot, copy it out, and
/// release the engine buffer.
pub fn take_byte_result<G: Guest + ?Sized>(guest: &mut G, slot: RetSlot) -> Result<Vec<u8>, BridgeError> {
    let ptr = slot.word(guest, 0)? as u32;
    let len = slot.word(guest, 1)? as u32;
    let bytes = get_bytes(guest, ptr, len)?;
    guest.free(ptr, len)?;
    Ok(bytes)
}

/// Read a `[ptr, len]` string result from a return slot. The engine buffer
/// is released even when decoding fails.
pub fn take_string_result<G: Guest + ?Sized>(guest: &mut G, slot: RetSlot) -> Result<String, BridgeError> {
    let ptr = slot.word(guest, 0)? as u32;
    let len = slot.word(guest, 1)? as u32;
    let text = get_string(guest, ptr, len);
    guest.free(ptr, len)?;
    text
}

/// Write an optional host string into a caller-owned slot as `[ptr, len]`,
/// `[0, 0]` when absent.
pub fn write_string_result<G: Guest + ?Sized>(
    guest: &mut G,
    slot: RetSlot,
    text: Option<&str>,
) -> Result<(), BridgeError> {
    let (ptr, len) = match text {
        Some(text) => pass_string(guest, text)?,
        None => (0, 0),
    };
    slot.set_word(guest, 1, len as i32)?;
    slot.set_word(guest, 0, ptr as i32)
}
