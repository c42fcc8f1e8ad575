//! Per-instance host state and the wasmtime-backed [`Guest`].
//!
//! `HostState` lives inside `Store<HostState>` for the lifetime of one engine
//! instance. It owns the bridge (handle table and view cache) so that no
//! state is shared between instances. `WasmGuest` pairs a store context
//! with the runtime exports and implements the `Guest` contract the
//! marshaling layer is written against.

use wasmtime::{
    AsContextMut, Memory, StoreContextMut, StoreLimits, Trap, TypedFunc, WasmParams, WasmResults,
};

use proofbridge_interop::{Bridge, BridgeError, ClosureCall, EngineFault, Guest, Handle, HostException};

use crate::config::EngineConfig;

/// Runtime exports every marshaling step relies on.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    pub malloc: TypedFunc<i32, i32>,
    pub realloc: TypedFunc<(i32, i32, i32), i32>,
    pub free: TypedFunc<(i32, i32), ()>,
    pub add_to_stack_pointer: TypedFunc<i32, i32>,
    pub exn_store: TypedFunc<i32, ()>,
    pub closure_invoke: Option<TypedFunc<(i32, i32, i32, i32, i32), ()>>,
    pub closure_destroy: Option<TypedFunc<(i32, i32, i32), ()>>,
}

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct HostState {
    pub bridge: Bridge,
    pub config: EngineConfig,
    /// Bound right after instantiation; `None` while the start function runs.
    pub exports: Option<GuestExports>,
    pub limits: StoreLimits,
    /// Guest `console_error` lines, collected when guest logs are enabled.
    pub guest_logs: Vec<String>,
}

impl HostState {
    pub fn new(config: EngineConfig, limits: StoreLimits) -> Self {
        Self {
            bridge: Bridge::new(config.scratch_capacity),
            config,
            exports: None,
            limits,
            guest_logs: Vec::new(),
        }
    }

    /// Record a guest diagnostic line.
    pub fn add_log(&mut self, message: String) {
        if !self.config.enable_guest_logs {
            return;
        }
        tracing::error!(target: "proofbridge::guest", "{}", message);
        self.guest_logs.push(message);
    }
}

/// Fault message for fuel exhaustion.
pub const OUT_OF_FUEL: &str = "fuel exhausted";

/// Map an error surfacing from a guest call onto the boundary taxonomy.
///
/// Host exceptions keep their identity. Anything else (traps, fuel
/// exhaustion, host import failures that unwound the guest) is a fault.
pub fn classify(err: anyhow::Error) -> BridgeError {
    if err.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) {
        return BridgeError::Fault(EngineFault::new(OUT_OF_FUEL));
    }
    let err = match err.downcast::<HostException>() {
        Ok(exn) => return BridgeError::Thrown(exn),
        Err(err) => err,
    };
    match err.downcast::<BridgeError>() {
        Ok(BridgeError::Thrown(exn)) => BridgeError::Thrown(exn),
        Ok(BridgeError::Fault(fault)) => BridgeError::Fault(fault),
        Ok(other) => BridgeError::Fault(EngineFault::new(format!("host import failed: {}", other))),
        Err(err) => BridgeError::Fault(EngineFault::new(format!("{:#}", err))),
    }
}

fn missing(name: &str) -> BridgeError {
    BridgeError::Fault(EngineFault::new(format!("engine does not export '{}'", name)))
}

/// [`Guest`] over a live wasmtime store.
pub struct WasmGuest<'a> {
    store: StoreContextMut<'a, HostState>,
    exports: GuestExports,
}

impl<'a> WasmGuest<'a> {
    pub fn new(store: impl Into<StoreContextMut<'a, HostState>>) -> Result<Self, BridgeError> {
        let store = store.into();
        let exports = store
            .data()
            .exports
            .clone()
            .ok_or_else(|| BridgeError::Fault(EngineFault::new("engine exports are not bound yet")))?;
        Ok(Self { store, exports })
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Call a guest function, classifying any failure.
    pub fn call<P, R>(&mut self, func: &TypedFunc<P, R>, params: P) -> Result<R, BridgeError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        func.call(self.store.as_context_mut(), params).map_err(classify)
    }
}

impl Guest for WasmGuest<'_> {
    fn split(&mut self) -> (&mut [u8], &mut Bridge) {
        let memory = self.exports.memory;
        let (mem, state) = memory.data_and_store_mut(self.store.as_context_mut());
        (mem, &mut state.bridge)
    }

    fn malloc(&mut self, size: u32) -> Result<u32, BridgeError> {
        let malloc = self.exports.malloc.clone();
        Ok(self.call(&malloc, size as i32)? as u32)
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError> {
        let realloc = self.exports.realloc.clone();
        Ok(self.call(&realloc, (ptr as i32, old_size as i32, new_size as i32))? as u32)
    }

    fn free(&mut self, ptr: u32, size: u32) -> Result<(), BridgeError> {
        let free = self.exports.free.clone();
        self.call(&free, (ptr as i32, size as i32))
    }

    fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, BridgeError> {
        let add = self.exports.add_to_stack_pointer.clone();
        Ok(self.call(&add, delta)? as u32)
    }

    fn store_exception(&mut self, handle: Handle) -> Result<(), BridgeError> {
        let store = self.exports.exn_store.clone();
        self.call(&store, handle.as_abi())
    }

    fn invoke_closure(&mut self, call: ClosureCall) -> Result<(), BridgeError> {
        let invoke = self
            .exports
            .closure_invoke
            .clone()
            .ok_or_else(|| missing("__pb_closure_invoke"))?;
        self.call(
            &invoke,
            (
                call.invoke as i32,
                call.retptr as i32,
                call.data as i32,
                call.vtable as i32,
                call.arg.as_abi(),
            ),
        )
    }

    fn destroy_closure(&mut self, dtor: u32, data: u32, vtable: u32) -> Result<(), BridgeError> {
        let destroy = self
            .exports
            .closure_destroy
            .clone()
            .ok_or_else(|| missing("__pb_closure_destroy"))?;
        self.call(&destroy, (dtor as i32, data as i32, vtable as i32))
    }
}
