//! Sandbox runtime: Wasmtime engine, module loading and engine instances.
//!
//! `Sandbox` compiles and validates the engine module once. Each call to
//! [`Sandbox::instantiate`] produces a [`WasmEngine`]: one isolated instance
//! with its own store, handle table and view cache. A `WasmEngine` exposes
//! the glue surface (witness computation, ACIR serialization, contract
//! generation) and the composer primitives the proof pipeline drives.
//!
//! A fault (trap, fuel exhaustion, failed host import) poisons the instance:
//! every later call fails with [`SandboxError::Poisoned`] without entering
//! the guest.

use std::path::Path;

use wasmtime::{
    AsContextMut, Config, Engine, Instance, Linker, Module, Store, StoreLimitsBuilder, TypedFunc, WasmParams,
    WasmResults,
};

use proofbridge_interop::exception::take_thrown;
use proofbridge_interop::{marshal, with_ret_slot, BridgeError, Guest, Handle, HostRef, RetSlot};

use crate::config::EngineConfig;
use crate::error::SandboxError;
use crate::host_impl::{GuestExports, HostState, WasmGuest, OUT_OF_FUEL};
use crate::linker::register_host_functions;
use crate::validation::validate_module;

/// Engine-side composer, identified by the pointer the engine returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComposerId(pub u32);

/// Engine-side proving or verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub u32);

/// A compiled, validated engine module.
pub struct Sandbox {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    config: EngineConfig,
}

impl Sandbox {
    /// Create a new sandbox from WASM bytecode (or WAT text).
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: impl AsRef<[u8]>, config: EngineConfig) -> Result<Self, SandboxError> {
        let engine = create_engine()?;
        let module = Module::new(&engine, wasm_bytes)?;
        Self::from_module(engine, module, config)
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: EngineConfig) -> Result<Self, SandboxError> {
        let engine = create_engine()?;
        let module = Module::from_file(&engine, path)?;
        Self::from_module(engine, module, config)
    }

    fn from_module(engine: Engine, module: Module, config: EngineConfig) -> Result<Self, SandboxError> {
        validate_module(&module)?;
        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker)?;
        Ok(Self {
            engine,
            module,
            linker,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a fresh, isolated engine instance.
    pub fn instantiate(&self) -> Result<WasmEngine, SandboxError> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory_bytes())
            .instances(1)
            .build();
        let mut store = Store::new(&self.engine, HostState::new(self.config.clone(), limits));
        store.limiter(|state| &mut state.limits);
        store.set_fuel(self.config.fuel_limit)?;

        let instance = self.linker.instantiate(&mut store, &self.module)?;
        let exports = bind_exports(&instance, &mut store)?;
        store.data_mut().exports = Some(exports);

        tracing::debug!(
            fuel = self.config.fuel_limit,
            max_memory_pages = self.config.max_memory_pages,
            "engine instance created"
        );
        Ok(WasmEngine {
            store,
            instance,
            poisoned: None,
        })
    }
}

/// Create a Wasmtime engine with fuel metering.
fn create_engine() -> Result<Engine, SandboxError> {
    let mut wasm_config = Config::new();
    wasm_config.consume_fuel(true);
    wasm_config.wasm_threads(false);
    Ok(Engine::new(&wasm_config)?)
}

fn bind_exports(instance: &Instance, store: &mut Store<HostState>) -> Result<GuestExports, SandboxError> {
    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| SandboxError::MemoryError("no memory export".into()))?;
    Ok(GuestExports {
        memory,
        malloc: instance.get_typed_func(&mut *store, "__pb_malloc")?,
        realloc: instance.get_typed_func(&mut *store, "__pb_realloc")?,
        free: instance.get_typed_func(&mut *store, "__pb_free")?,
        add_to_stack_pointer: instance.get_typed_func(&mut *store, "__pb_add_to_stack_pointer")?,
        exn_store: instance.get_typed_func(&mut *store, "__pb_exn_store")?,
        closure_invoke: instance.get_typed_func(&mut *store, "__pb_closure_invoke").ok(),
        closure_destroy: instance.get_typed_func(&mut *store, "__pb_closure_destroy").ok(),
    })
}

/// One live engine instance.
pub struct WasmEngine {
    store: Store<HostState>,
    instance: Instance,
    poisoned: Option<String>,
}

impl WasmEngine {
    /// The fault that poisoned this instance, if any.
    pub fn poisoned(&self) -> Option<&str> {
        self.poisoned.as_deref()
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    /// Guest diagnostics collected so far.
    pub fn guest_logs(&self) -> &[String] {
        &self.store.data().guest_logs
    }

    /// Fuel left before the instance faults.
    pub fn remaining_fuel(&self) -> Result<u64, SandboxError> {
        Ok(self.store.get_fuel()?)
    }

    fn export<P, R>(&mut self, name: &'static str) -> Result<TypedFunc<P, R>, SandboxError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.check_poisoned()?;
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or(SandboxError::MissingExport(name))?;
        Ok(func.typed::<P, R>(&self.store)?)
    }

    fn check_poisoned(&self) -> Result<(), SandboxError> {
        match &self.poisoned {
            Some(reason) => Err(SandboxError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    /// Run one boundary operation against the instance. Fatal errors poison
    /// it; fuel exhaustion is reported as such.
    fn run<T>(
        &mut self,
        f: impl FnOnce(&mut WasmGuest<'_>) -> Result<T, BridgeError>,
    ) -> Result<T, SandboxError> {
        self.check_poisoned()?;
        let result = WasmGuest::new(self.store.as_context_mut()).and_then(|mut guest| f(&mut guest));
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_fatal() => {
                let out_of_fuel = matches!(&err, BridgeError::Fault(fault) if fault.message == OUT_OF_FUEL);
                tracing::warn!(reason = %err, "engine instance poisoned");
                self.poisoned = Some(err.to_string());
                if out_of_fuel {
                    Err(SandboxError::FuelExhausted)
                } else {
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    // ── Glue surface ──

    /// Solve the circuit for the remaining witness values given the
    /// initial ones.
    pub fn compute_witnesses<S: AsRef<str>>(
        &mut self,
        circuit: HostRef,
        initial_witness: &[S],
    ) -> Result<Vec<u8>, SandboxError> {
        let func = self.export::<(i32, i32, i32, i32), ()>("compute_witnesses")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                with_borrowed(guest, circuit, |guest, circuit| {
                    let (ptr, len) = marshal::pass_string_array(guest, initial_witness)?;
                    guest.call(&func, (slot.as_abi(), circuit.as_abi(), ptr as i32, len as i32))?;
                    marshal::take_byte_result(guest, slot)
                })
            })
        })
    }

    /// Serialize an ACIR description into the engine's circuit format.
    pub fn serialise_acir_to_circuit(&mut self, acir: HostRef) -> Result<Vec<u8>, SandboxError> {
        let func = self.export::<(i32, i32), ()>("serialise_acir_to_circuit")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                with_borrowed(guest, acir, |guest, acir| {
                    guest.call(&func, (slot.as_abi(), acir.as_abi()))?;
                    marshal::take_byte_result(guest, slot)
                })
            })
        })
    }

    /// Expand a packed witness into the engine's witness layout.
    pub fn packed_witness_to_witness(
        &mut self,
        acir: HostRef,
        witness: &[u8],
    ) -> Result<Vec<u8>, SandboxError> {
        let func = self.export::<(i32, i32, i32, i32), ()>("packed_witness_to_witness")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                with_borrowed(guest, acir, |guest, acir| {
                    let (ptr, len) = marshal::pass_bytes(guest, witness)?;
                    guest.call(&func, (slot.as_abi(), acir.as_abi(), ptr as i32, len as i32))?;
                    marshal::take_byte_result(guest, slot)
                })
            })
        })
    }

    /// Render the verifier contract for the given verification-key method.
    pub fn eth_contract_from_cs(&mut self, vk_method: &str) -> Result<String, SandboxError> {
        let func = self.export::<(i32, i32, i32), ()>("eth_contract_from_cs")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                let (ptr, len) = marshal::pass_string(guest, vk_method)?;
                guest.call(&func, (slot.as_abi(), ptr as i32, len as i32))?;
                marshal::take_string_result(guest, slot)
            })
        })
    }

    /// Serialize public inputs given as decimal or hex strings.
    pub fn serialise_public_inputs<S: AsRef<str>>(
        &mut self,
        public_inputs: &[S],
    ) -> Result<Vec<u8>, SandboxError> {
        let func = self.export::<(i32, i32, i32), ()>("serialise_public_inputs")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                let (ptr, len) = marshal::pass_string_array(guest, public_inputs)?;
                guest.call(&func, (slot.as_abi(), ptr as i32, len as i32))?;
                marshal::take_byte_result(guest, slot)
            })
        })
    }

    /// Call an engine closure the host received as a value.
    pub fn call_closure(&mut self, closure: &HostRef, arg: HostRef) -> Result<HostRef, SandboxError> {
        let closure = closure.clone();
        self.run(|guest| closure.as_closure()?.call(guest, arg))
    }

    // ── Composer primitives ──

    pub fn composer_new(&mut self, constraint_system: &[u8]) -> Result<ComposerId, SandboxError> {
        let func = self.export::<(i32, i32), i32>("composer_new")?;
        self.run(|guest| {
            let (ptr, len) = marshal::pass_bytes(guest, constraint_system)?;
            let composer = guest.call(&func, (ptr as i32, len as i32))?;
            Ok(ComposerId(composer as u32))
        })
    }

    pub fn composer_free(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        let func = self.export::<i32, ()>("composer_free")?;
        self.run(|guest| guest.call(&func, composer.0 as i32))
    }

    pub fn key_free(&mut self, key: KeyId) -> Result<(), SandboxError> {
        let func = self.export::<i32, ()>("key_free")?;
        self.run(|guest| guest.call(&func, key.0 as i32))
    }

    pub fn circuit_size(&mut self, composer: ComposerId) -> Result<u32, SandboxError> {
        let func = self.export::<i32, i32>("composer_circuit_size")?;
        self.run(|guest| Ok(guest.call(&func, composer.0 as i32)? as u32))
    }

    pub fn init_reference_data(
        &mut self,
        composer: ComposerId,
        size: u32,
        g1: &[u8],
        g2: &[u8],
    ) -> Result<(), SandboxError> {
        let func = self.export::<(i32, i32, i32, i32, i32, i32, i32), ()>("composer_init_reference_data")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                let (g1_ptr, g1_len) = marshal::pass_bytes(guest, g1)?;
                let (g2_ptr, g2_len) = marshal::pass_bytes(guest, g2)?;
                guest.call(
                    &func,
                    (
                        slot.as_abi(),
                        composer.0 as i32,
                        size as i32,
                        g1_ptr as i32,
                        g1_len as i32,
                        g2_ptr as i32,
                        g2_len as i32,
                    ),
                )?;
                thrown_at(guest, slot, 0)
            })
        })
    }

    pub fn create_multiscalar_setup(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        let func = self.export::<(i32, i32), ()>("composer_create_multiscalar_setup")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                guest.call(&func, (slot.as_abi(), composer.0 as i32))?;
                thrown_at(guest, slot, 0)
            })
        })
    }

    pub fn compute_proving_key(&mut self, composer: ComposerId) -> Result<KeyId, SandboxError> {
        let func = self.export::<(i32, i32), ()>("composer_compute_proving_key")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                guest.call(&func, (slot.as_abi(), composer.0 as i32))?;
                thrown_at(guest, slot, 1)?;
                Ok(KeyId(slot.word(guest, 0)? as u32))
            })
        })
    }

    pub fn compute_verification_key(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
    ) -> Result<KeyId, SandboxError> {
        let func = self.export::<(i32, i32, i32), ()>("composer_compute_verification_key")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                guest.call(&func, (slot.as_abi(), composer.0 as i32, proving_key.0 as i32))?;
                thrown_at(guest, slot, 1)?;
                Ok(KeyId(slot.word(guest, 0)? as u32))
            })
        })
    }

    pub fn create_proof(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
        witness: &[u8],
    ) -> Result<Vec<u8>, SandboxError> {
        let func = self.export::<(i32, i32, i32, i32, i32), ()>("composer_create_proof")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                let (ptr, len) = marshal::pass_bytes(guest, witness)?;
                guest.call(
                    &func,
                    (slot.as_abi(), composer.0 as i32, proving_key.0 as i32, ptr as i32, len as i32),
                )?;
                thrown_at(guest, slot, 2)?;
                marshal::take_byte_result(guest, slot)
            })
        })
    }

    pub fn verify(
        &mut self,
        composer: ComposerId,
        verification_key: KeyId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, SandboxError> {
        let func = self.export::<(i32, i32, i32, i32, i32, i32, i32), ()>("composer_verify")?;
        self.run(|guest| {
            with_ret_slot(guest, |guest, slot| {
                let (proof_ptr, proof_len) = marshal::pass_bytes(guest, proof)?;
                let (pub_ptr, pub_len) = marshal::pass_bytes(guest, public_inputs)?;
                guest.call(
                    &func,
                    (
                        slot.as_abi(),
                        composer.0 as i32,
                        verification_key.0 as i32,
                        proof_ptr as i32,
                        proof_len as i32,
                        pub_ptr as i32,
                        pub_len as i32,
                    ),
                )?;
                thrown_at(guest, slot, 1)?;
                Ok(slot.word(guest, 0)? != 0)
            })
        })
    }
}

/// Borrow `value` into the scratch region for the duration of `f`.
fn with_borrowed<G, R, F>(guest: &mut G, value: HostRef, f: F) -> Result<R, BridgeError>
where
    G: Guest + ?Sized,
    F: FnOnce(&mut G, Handle) -> Result<R, BridgeError>,
{
    let handle = guest.handles().borrow(value)?;
    let result = f(guest, handle);
    guest.handles().release_borrowed();
    result
}

/// Re-raise the exception reported by the `[err, is_err]` words starting at
/// word `index` of the return slot.
fn thrown_at<G: Guest + ?Sized>(guest: &mut G, slot: RetSlot, index: usize) -> Result<(), BridgeError> {
    let err = slot.word(guest, index)?;
    let is_err = slot.word(guest, index + 1)?;
    take_thrown(guest, err, is_err)
}
