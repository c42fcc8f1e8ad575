//! Engine closures held by the host.
//!
//! The engine describes a closure with two context words (a data pointer
//! and a descriptor, like a fat pointer), the table index of its invoke
//! entry and the table index of its destructor. The host wraps these in a
//! [`Closure`] value and can call it like any other host function.
//!
//! Every call bumps the reference count and clears the data word for the
//! duration of the call. A call that finds the data word cleared is either
//! reentrant or racing teardown and fails with
//! [`BridgeError::ClosureDestroyed`]. When the engine drops its side while a
//! call is running, the count reaches zero on return and the host runs the
//! destructor instead of restoring the data word.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::BridgeError;
use crate::exception;
use crate::guest::Guest;
use crate::handles::Handle;
use crate::memory::{with_ret_slot, RetSlot};
use crate::value::HostRef;

/// Whether the invoke entry can report a host exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// Result words: `[value, err, is_err]`.
    Fallible,
    /// Result words: `[value]`.
    Infallible,
}

impl ClosureKind {
    pub fn from_abi(raw: i32) -> Self {
        if raw != 0 {
            Self::Fallible
        } else {
            Self::Infallible
        }
    }
}

/// Arguments of one invoke-entry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureCall {
    pub invoke: u32,
    pub retptr: u32,
    pub data: u32,
    pub vtable: u32,
    pub arg: Handle,
}

/// Reference-counted engine closure.
#[derive(Debug)]
pub struct Closure {
    data: AtomicU32,
    vtable: u32,
    refs: AtomicU32,
    invoke: u32,
    dtor: u32,
    kind: ClosureKind,
}

impl Closure {
    pub fn new(data: u32, vtable: u32, invoke: u32, dtor: u32, kind: ClosureKind) -> Self {
        Self {
            data: AtomicU32::new(data),
            vtable,
            refs: AtomicU32::new(1),
            invoke,
            dtor,
            kind,
        }
    }

    pub fn kind(&self) -> ClosureKind {
        self.kind
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    /// True once the engine side has been torn down.
    pub fn is_destroyed(&self) -> bool {
        self.refs() == 0
    }

    /// Call the closure with one argument, borrowed for the call.
    pub fn call<G: Guest + ?Sized>(&self, guest: &mut G, arg: HostRef) -> Result<HostRef, BridgeError> {
        let data = self.data.swap(0, Ordering::SeqCst);
        if data == 0 {
            return Err(BridgeError::ClosureDestroyed);
        }
        self.refs.fetch_add(1, Ordering::SeqCst);

        let result = with_ret_slot(guest, |guest, slot| {
            let arg = guest.handles().borrow(arg)?;
            let call = ClosureCall {
                invoke: self.invoke,
                retptr: slot.ptr(),
                data,
                vtable: self.vtable,
                arg,
            };
            let outcome = guest
                .invoke_closure(call)
                .and_then(|()| self.unpack(guest, slot));
            guest.handles().release_borrowed();
            outcome
        });

        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!(dtor = self.dtor, "closure released during call, destroying");
            guest.destroy_closure(self.dtor, data, self.vtable)?;
        } else {
            self.data.store(data, Ordering::SeqCst);
        }
        result
    }

    fn unpack<G: Guest + ?Sized>(&self, guest: &mut G, slot: RetSlot) -> Result<HostRef, BridgeError> {
        let value = slot.word(guest, 0)?;
        if self.kind == ClosureKind::Fallible {
            let err = slot.word(guest, 1)?;
            let is_err = slot.word(guest, 2)?;
            exception::take_thrown(guest, err, is_err)?;
        }
        guest.handles().take(Handle::from_abi(value))
    }

    /// Drop the engine's reference. Returns true when this was the last
    /// one; the engine then frees its own closure state.
    pub fn release(&self) -> bool {
        let previous = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                self.data.store(0, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_guest::MemGuest;
    use crate::value::HostValue;
    use std::sync::Arc;

    const INVOKE_DOUBLE: u32 = 7;
    const INVOKE_THROW: u32 = 8;
    const DTOR: u32 = 3;

    fn guest_with_closures() -> MemGuest {
        let mut guest = MemGuest::new();
        guest.register_invoke(
            INVOKE_DOUBLE,
            Arc::new(|guest: &mut MemGuest, call: ClosureCall| {
                let arg = guest.handles().get(call.arg)?;
                let n = arg.as_number().unwrap_or(0.0);
                let out = guest.handles().allocate(HostValue::number(n * 2.0));
                let slot = RetSlot::at(call.retptr as i32);
                slot.set_word(guest, 0, out.as_abi())?;
                slot.set_word(guest, 1, 0)?;
                slot.set_word(guest, 2, 0)
            }),
        );
        guest.register_invoke(
            INVOKE_THROW,
            Arc::new(|guest: &mut MemGuest, call: ClosureCall| {
                let err = guest.handles().allocate(HostValue::error("rejected"));
                let slot = RetSlot::at(call.retptr as i32);
                slot.set_word(guest, 0, 0)?;
                slot.set_word(guest, 1, err.as_abi())?;
                slot.set_word(guest, 2, 1)
            }),
        );
        guest
    }

    #[test]
    fn test_call_returns_value_and_restores_state() {
        let mut guest = guest_with_closures();
        let sp = guest.stack_pointer();
        let closure = Closure::new(100, 200, INVOKE_DOUBLE, DTOR, ClosureKind::Fallible);

        let out = closure.call(&mut guest, HostValue::number(21.0)).unwrap();
        assert_eq!(out.as_number(), Some(42.0));
        assert_eq!(closure.refs(), 1);
        assert_eq!(guest.stack_pointer(), sp);
        assert_eq!(guest.handles().borrowed(), 0);
        assert_eq!(guest.handles().live(), 0);

        // Callable again: the data word was restored.
        closure.call(&mut guest, HostValue::number(1.0)).unwrap();
    }

    #[test]
    fn test_fallible_closure_propagates_exception() {
        let mut guest = guest_with_closures();
        let sp = guest.stack_pointer();
        let closure = Closure::new(100, 200, INVOKE_THROW, DTOR, ClosureKind::Fallible);

        let err = closure.call(&mut guest, HostValue::null()).unwrap_err();
        match err {
            BridgeError::Thrown(exn) => assert_eq!(exn.value().as_error().unwrap().message, "rejected"),
            other => panic!("expected thrown error, got {:?}", other),
        }
        assert_eq!(guest.stack_pointer(), sp);
        assert_eq!(guest.handles().borrowed(), 0);
    }

    #[test]
    fn test_release_then_call_detected() {
        let mut guest = guest_with_closures();
        let closure = Closure::new(100, 200, INVOKE_DOUBLE, DTOR, ClosureKind::Fallible);
        assert!(closure.release());
        assert!(closure.is_destroyed());
        let err = closure.call(&mut guest, HostValue::number(1.0)).unwrap_err();
        assert!(matches!(err, BridgeError::ClosureDestroyed));
        assert!(!closure.release());
    }

    #[test]
    fn test_release_during_call_runs_destructor() {
        let mut guest = MemGuest::new();
        let closure = Arc::new(Closure::new(100, 200, INVOKE_DOUBLE, DTOR, ClosureKind::Infallible));
        let inner = closure.clone();
        guest.register_invoke(
            INVOKE_DOUBLE,
            Arc::new(move |guest: &mut MemGuest, call: ClosureCall| {
                // The engine drops its side while the closure is running.
                assert!(!inner.release());
                // Reentrant call is detected, not executed.
                assert!(matches!(
                    inner.call(guest, HostValue::null()),
                    Err(BridgeError::ClosureDestroyed)
                ));
                RetSlot::at(call.retptr as i32).set_word(guest, 0, crate::handles::UNDEFINED.as_abi())
            }),
        );

        let out = closure.call(&mut guest, HostValue::null()).unwrap();
        assert!(out.is_undefined());
        assert_eq!(guest.destroyed(), &[(DTOR, 100, 200)]);
        assert!(closure.is_destroyed());
    }
}
