//! Host function registration via Wasmtime linker.
//!
//! Registers every `proofbridge_host` import with the Wasmtime `Linker`.
//! Each function:
//! 1. Builds a `WasmGuest` over the caller's store
//! 2. Resolves handle arguments through the instance's handle table
//! 3. Performs the operation, marshaling strings and bytes as needed
//! 4. Returns a handle, a scalar, or writes `[ptr, len]` to a return slot
//!
//! Bad handles and bad pointers fail the import, which unwinds the guest
//! and surfaces as an engine fault. Only `reflect_get` reports failures as
//! host exceptions through the engine's exception slot.

use std::sync::Arc;

use wasmtime::{AsContextMut, Caller, Linker};

use proofbridge_interop::exception::park_exception;
use proofbridge_interop::handles::UNDEFINED;
use proofbridge_interop::{
    marshal, memory, BridgeError, Closure, ClosureKind, ErrorObject, Guest, Handle, HostException,
    HostRef, HostValue, RetSlot,
};

use crate::error::SandboxError;
use crate::host_impl::{HostState, WasmGuest};
use crate::validation::HOST_MODULE;

/// Run `f` against a guest view of the caller's instance.
fn with_guest<R>(
    caller: &mut Caller<'_, HostState>,
    f: impl FnOnce(&mut WasmGuest<'_>) -> Result<R, BridgeError>,
) -> anyhow::Result<R> {
    let mut guest = WasmGuest::new(caller.as_context_mut())?;
    Ok(f(&mut guest)?)
}

fn get(caller: &Caller<'_, HostState>, raw: i32) -> Result<HostRef, BridgeError> {
    caller.data().bridge.handles.get(Handle::from_abi(raw))
}

fn alloc(caller: &mut Caller<'_, HostState>, value: HostRef) -> i32 {
    caller.data_mut().bridge.handles.allocate(value).as_abi()
}

/// Register all `proofbridge_host` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    register_object_imports(linker)?;
    register_string_imports(linker)?;
    register_error_imports(linker)?;
    register_array_imports(linker)?;
    register_bytes_imports(linker)?;
    register_reflection_imports(linker)?;
    register_closure_imports(linker)?;
    Ok(())
}

// ── Handles and scalars ──

fn register_object_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "object_drop_ref",
        |mut caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<()> {
            caller.data_mut().bridge.handles.take(Handle::from_abi(h))?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "object_clone_ref",
        |mut caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<i32> {
            Ok(caller.data_mut().bridge.handles.clone_ref(Handle::from_abi(h))?.as_abi())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "number_new",
        |mut caller: Caller<'_, HostState>, n: f64| -> i32 { alloc(&mut caller, HostValue::number(n)) },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "number_get",
        |mut caller: Caller<'_, HostState>, ret: i32, h: i32| -> anyhow::Result<()> {
            let value = get(&caller, h)?;
            with_guest(&mut caller, |guest| {
                let slot = RetSlot::at(ret);
                let number = value.as_number();
                slot.set_float(guest, 1, number.unwrap_or(0.0))?;
                slot.set_word(guest, 0, number.is_some() as i32)
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "is_undefined",
        |caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<i32> {
            Ok(get(&caller, h)?.is_undefined() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "json_serialize",
        |mut caller: Caller<'_, HostState>, ret: i32, h: i32| -> anyhow::Result<()> {
            let json = serde_json::to_string(&get(&caller, h)?.to_json()?)?;
            with_guest(&mut caller, |guest| {
                marshal::write_string_result(guest, RetSlot::at(ret), Some(&json))
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "debug_string",
        |mut caller: Caller<'_, HostState>, ret: i32, h: i32| -> anyhow::Result<()> {
            let text = get(&caller, h)?.debug_string();
            with_guest(&mut caller, |guest| {
                marshal::write_string_result(guest, RetSlot::at(ret), Some(&text))
            })
        },
    )?;

    Ok(())
}

// ── Strings ──

fn register_string_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "string_new",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            with_guest(&mut caller, |guest| {
                let text = marshal::get_string(guest, ptr as u32, len as u32)?;
                Ok(guest.handles().allocate(HostValue::string(text)).as_abi())
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "string_get",
        |mut caller: Caller<'_, HostState>, ret: i32, h: i32| -> anyhow::Result<()> {
            let value = get(&caller, h)?;
            with_guest(&mut caller, |guest| {
                marshal::write_string_result(guest, RetSlot::at(ret), value.as_str())
            })
        },
    )?;

    Ok(())
}

// ── Errors and diagnostics ──

fn register_error_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "error_new",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            with_guest(&mut caller, |guest| {
                let message = marshal::get_string(guest, ptr as u32, len as u32)?;
                Ok(guest.handles().allocate(HostValue::error(message)).as_abi())
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "error_stack",
        |mut caller: Caller<'_, HostState>, ret: i32, h: i32| -> anyhow::Result<()> {
            let value = get(&caller, h)?;
            let stack = value.as_error().map(|e| e.stack.as_str());
            with_guest(&mut caller, |guest| {
                marshal::write_string_result(guest, RetSlot::at(ret), stack)
            })
        },
    )?;

    // The guest hands over ownership of the message buffer.
    linker.func_wrap(
        HOST_MODULE,
        "console_error",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            with_guest(&mut caller, |guest| {
                let message = marshal::get_string(guest, ptr as u32, len as u32);
                guest.free(ptr as u32, len as u32)?;
                guest.state_mut().add_log(message?);
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "throw",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = with_guest(&mut caller, |guest| {
                marshal::get_string(guest, ptr as u32, len as u32)
            })?;
            Err(HostException::error(message).into())
        },
    )?;

    Ok(())
}

// ── Arrays ──

fn register_array_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "array_new",
        |mut caller: Caller<'_, HostState>| -> i32 { alloc(&mut caller, HostValue::array(Vec::new())) },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "array_push",
        |caller: Caller<'_, HostState>, arr: i32, h: i32| -> anyhow::Result<i32> {
            let value = get(&caller, h)?;
            let array = get(&caller, arr)?;
            let mut items = array.items()?;
            items.push(value);
            Ok(items.len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "array_get",
        |mut caller: Caller<'_, HostState>, arr: i32, index: i32| -> anyhow::Result<i32> {
            let array = get(&caller, arr)?;
            let item = array.items()?.get(index as u32 as usize).cloned();
            Ok(match item {
                Some(item) => alloc(&mut caller, item),
                None => UNDEFINED.as_abi(),
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "array_length",
        |caller: Caller<'_, HostState>, arr: i32| -> anyhow::Result<i32> {
            Ok(get(&caller, arr)?.items()?.len() as i32)
        },
    )?;

    Ok(())
}

// ── Byte arrays ──

fn register_bytes_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "bytes_new",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            with_guest(&mut caller, |guest| {
                let bytes = marshal::get_bytes(guest, ptr as u32, len as u32)?;
                Ok(guest.handles().allocate(HostValue::bytes(bytes)).as_abi())
            })
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "bytes_length",
        |caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<i32> {
            Ok(get(&caller, h)?.as_bytes()?.len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "bytes_copy_to",
        |mut caller: Caller<'_, HostState>, h: i32, ptr: i32| -> anyhow::Result<()> {
            let value = get(&caller, h)?;
            let bytes = value.as_bytes()?;
            with_guest(&mut caller, |guest| {
                let (mem, _) = guest.split();
                memory::write_bytes(mem, ptr as u32, bytes)
            })
        },
    )?;

    Ok(())
}

// ── Memory and reflection ──

fn register_reflection_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "memory",
        |mut caller: Caller<'_, HostState>| -> i32 { alloc(&mut caller, Arc::new(HostValue::Memory)) },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "is_memory",
        |caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<i32> {
            Ok(matches!(*get(&caller, h)?, HostValue::Memory) as i32)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "reflect_get",
        |mut caller: Caller<'_, HostState>, target: i32, key: i32| -> anyhow::Result<i32> {
            let target = get(&caller, target)?;
            let key = get(&caller, key)?;
            with_guest(&mut caller, |guest| {
                match park_exception(guest, reflect_get(&target, &key))? {
                    Some(value) => Ok(guest.handles().allocate(value).as_abi()),
                    None => Ok(UNDEFINED.as_abi()),
                }
            })
        },
    )?;

    Ok(())
}

/// Property lookup with the semantics the engine's glue expects: missing
/// properties are `undefined`, reading from `undefined` or `null` raises a
/// `TypeError`.
pub fn reflect_get(target: &HostValue, key: &HostValue) -> Result<HostRef, HostException> {
    let type_error = |message: String| {
        HostException::new(Arc::new(HostValue::Error(ErrorObject::named("TypeError", message))))
    };
    let index = key.as_number().filter(|n| n.fract() == 0.0 && *n >= 0.0).map(|n| n as usize);
    let name = key.as_str();

    match target {
        HostValue::Undefined | HostValue::Null => Err(type_error(format!(
            "cannot read property {} of {}",
            key.debug_string(),
            target.kind()
        ))),
        HostValue::Array(_) => {
            let items = target.items().map_err(|e| type_error(e.to_string()))?;
            Ok(match (index, name) {
                (Some(i), _) => items.get(i).cloned().unwrap_or_else(HostValue::undefined),
                (_, Some("length")) => HostValue::number(items.len() as f64),
                _ => HostValue::undefined(),
            })
        }
        HostValue::Bytes(bytes) => Ok(match (index, name) {
            (Some(i), _) => bytes
                .get(i)
                .map(|b| HostValue::number(*b as f64))
                .unwrap_or_else(HostValue::undefined),
            (_, Some("length")) => HostValue::number(bytes.len() as f64),
            _ => HostValue::undefined(),
        }),
        HostValue::String(s) => Ok(match name {
            Some("length") => HostValue::number(s.encode_utf16().count() as f64),
            _ => HostValue::undefined(),
        }),
        HostValue::Json(json) => {
            let found = match (json, index, name) {
                (serde_json::Value::Array(items), Some(i), _) => items.get(i),
                (serde_json::Value::Object(map), _, Some(field)) => map.get(field),
                _ => None,
            };
            Ok(found.map(from_json).unwrap_or_else(HostValue::undefined))
        }
        HostValue::Error(e) => Ok(match name {
            Some("name") => HostValue::string(e.name.clone()),
            Some("message") => HostValue::string(e.message.clone()),
            Some("stack") => HostValue::string(e.stack.clone()),
            _ => HostValue::undefined(),
        }),
        _ => Ok(HostValue::undefined()),
    }
}

/// Lift a JSON value into the matching host value kind.
fn from_json(value: &serde_json::Value) -> HostRef {
    use serde_json::Value;

    match value {
        Value::Null => HostValue::null(),
        Value::Bool(b) => HostValue::bool(*b),
        Value::Number(n) => n.as_f64().map(HostValue::number).unwrap_or_else(HostValue::undefined),
        Value::String(s) => HostValue::string(s.clone()),
        other => HostValue::json(other.clone()),
    }
}

// ── Closures ──

fn register_closure_imports(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "closure_new",
        |mut caller: Caller<'_, HostState>,
         data: i32,
         vtable: i32,
         invoke: i32,
         dtor: i32,
         fallible: i32|
         -> i32 {
            let closure = Closure::new(
                data as u32,
                vtable as u32,
                invoke as u32,
                dtor as u32,
                ClosureKind::from_abi(fallible),
            );
            alloc(&mut caller, Arc::new(HostValue::Closure(closure)))
        },
    )?;

    // Returns 1 when the guest held the last reference and must free the
    // closure state itself.
    linker.func_wrap(
        HOST_MODULE,
        "closure_drop",
        |mut caller: Caller<'_, HostState>, h: i32| -> anyhow::Result<i32> {
            let value = caller.data_mut().bridge.handles.take(Handle::from_abi(h))?;
            Ok(value.as_closure()?.release() as i32)
        },
    )?;

    Ok(())
}
