//! Shared test helpers for integration tests.
//!
//! Provides WAT fixtures that stand in for the proving engine: a small bump
//! allocator and shadow stack, plus mock entry points that exercise the
//! host imports (echoing buffers, serializing handles, raising exceptions,
//! registering closures).

#![allow(dead_code)]

use proofbridge_sandbox::{EngineConfig, Sandbox, WasmEngine};

/// Allocator, shadow stack and exception slot every fixture needs.
///
/// The shadow stack occupies `[0, 16384)` and grows down; the heap starts
/// at 16384 and grows memory a page at a time.
const RUNTIME: &str = r#"
    (import "proofbridge_host" "object_drop_ref" (func $drop (param i32)))
    (import "proofbridge_host" "object_clone_ref" (func $clone (param i32) (result i32)))
    (import "proofbridge_host" "is_undefined" (func $is_undefined (param i32) (result i32)))
    (import "proofbridge_host" "json_serialize" (func $json (param i32 i32)))
    (import "proofbridge_host" "error_new" (func $error_new (param i32 i32) (result i32)))
    (import "proofbridge_host" "console_error" (func $console_error (param i32 i32)))
    (import "proofbridge_host" "throw" (func $throw (param i32 i32)))
    (import "proofbridge_host" "closure_new" (func $closure_new (param i32 i32 i32 i32 i32) (result i32)))
    (import "proofbridge_host" "array_push" (func $array_push (param i32 i32) (result i32)))

    (memory (export "memory") 1)
    (global $sp (mut i32) (i32.const 16384))
    (global $heap (mut i32) (i32.const 16384))
    (global $exn (mut i32) (i32.const 0))
    (global $destroyed (mut i32) (i32.const 0))

    (data (i32.const 256) "circuit is undefined")
    (data (i32.const 320) "bad g2 length")

    (func $malloc (export "__pb_malloc") (param $size i32) (result i32)
        (local $ptr i32) (local $end i32) (local $limit i32)
        (local.set $ptr (global.get $heap))
        (local.set $end
            (i32.add (local.get $ptr)
                (i32.and (i32.add (local.get $size) (i32.const 7)) (i32.const -8))))
        (local.set $limit (i32.mul (memory.size) (i32.const 65536)))
        (if (i32.gt_u (local.get $end) (local.get $limit))
            (then
                (if (i32.eq
                        (memory.grow
                            (i32.add
                                (i32.shr_u (i32.sub (local.get $end) (local.get $limit)) (i32.const 16))
                                (i32.const 1)))
                        (i32.const -1))
                    (then unreachable))))
        (global.set $heap (local.get $end))
        (local.get $ptr))

    (func (export "__pb_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
        (local $out i32)
        (local.set $out (call $malloc (local.get $new)))
        (memory.copy
            (local.get $out)
            (local.get $ptr)
            (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
        (local.get $out))

    (func (export "__pb_free") (param i32 i32))

    (func (export "__pb_add_to_stack_pointer") (param $delta i32) (result i32)
        (global.set $sp (i32.add (global.get $sp) (local.get $delta)))
        (global.get $sp))

    (func (export "__pb_exn_store") (param $h i32)
        (global.set $exn (local.get $h)))

    ;; Drop every handle in a handle array.
    (func $drop_all (param $ptr i32) (param $len i32)
        (local $i i32)
        (block $done
            (loop $next
                (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
                (call $drop (i32.load (i32.add (local.get $ptr) (i32.shl (local.get $i) (i32.const 2)))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $next))))

    ;; Return `[ptr, len]` through a return slot.
    (func $ret_bytes (param $ret i32) (param $ptr i32) (param $len i32)
        (i32.store (local.get $ret) (local.get $ptr))
        (i32.store offset=4 (local.get $ret) (local.get $len)))
"#;

/// Mock glue surface and composer.
///
/// - `eth_contract_from_cs` and `packed_witness_to_witness` echo their input
/// - `serialise_acir_to_circuit` returns the JSON form of the ACIR value
/// - `serialise_public_inputs` consumes the string handles and returns the
///   raw handle words
/// - `compute_witnesses` does the same, but logs and throws when the
///   circuit is `undefined`
/// - `composer_new` spins forever on an empty constraint system
/// - `composer_free(0)` traps
/// - `composer_init_reference_data` raises unless G2 is 128 bytes
/// - `composer_create_proof` returns the witness as the proof
/// - `composer_verify` accepts proofs whose first byte is 1
const SURFACE: &str = r#"
    (func (export "eth_contract_from_cs") (param $ret i32) (param $ptr i32) (param $len i32)
        (call $ret_bytes (local.get $ret) (local.get $ptr) (local.get $len)))

    (func (export "serialise_acir_to_circuit") (param $ret i32) (param $acir i32)
        (call $json (local.get $ret) (local.get $acir)))

    (func (export "packed_witness_to_witness")
        (param $ret i32) (param $acir i32) (param $ptr i32) (param $len i32)
        (call $ret_bytes (local.get $ret) (local.get $ptr) (local.get $len)))

    (func (export "serialise_public_inputs") (param $ret i32) (param $ptr i32) (param $len i32)
        (call $drop_all (local.get $ptr) (local.get $len))
        (call $ret_bytes (local.get $ret) (local.get $ptr) (i32.shl (local.get $len) (i32.const 2))))

    (func (export "compute_witnesses")
        (param $ret i32) (param $circuit i32) (param $ptr i32) (param $len i32)
        (call $drop_all (local.get $ptr) (local.get $len))
        (if (call $is_undefined (local.get $circuit))
            (then
                (call $console_error (i32.const 256) (i32.const 20))
                (call $throw (i32.const 256) (i32.const 20))))
        (call $ret_bytes (local.get $ret) (local.get $ptr) (i32.shl (local.get $len) (i32.const 2))))

    (func (export "composer_new") (param $ptr i32) (param $len i32) (result i32)
        (if (i32.eqz (local.get $len))
            (then (loop $spin (br $spin))))
        (local.get $ptr))

    (func (export "composer_free") (param $composer i32)
        (if (i32.eqz (local.get $composer)) (then unreachable)))

    (func (export "key_free") (param i32))

    (func (export "composer_circuit_size") (param i32) (result i32)
        (i32.const 1000))

    (func (export "composer_init_reference_data")
        (param $ret i32) (param $composer i32) (param $size i32)
        (param $g1 i32) (param $g1_len i32) (param $g2 i32) (param $g2_len i32)
        (if (i32.ne (local.get $g2_len) (i32.const 128))
            (then
                (i32.store (local.get $ret) (call $error_new (i32.const 320) (i32.const 13)))
                (i32.store offset=4 (local.get $ret) (i32.const 1)))
            (else
                (i32.store (local.get $ret) (i32.const 0))
                (i32.store offset=4 (local.get $ret) (i32.const 0)))))

    (func (export "composer_create_multiscalar_setup") (param $ret i32) (param i32)
        (i32.store (local.get $ret) (i32.const 0))
        (i32.store offset=4 (local.get $ret) (i32.const 0)))

    (func (export "composer_compute_proving_key") (param $ret i32) (param i32)
        (i32.store (local.get $ret) (i32.const 7))
        (i32.store offset=4 (local.get $ret) (i32.const 0))
        (i32.store offset=8 (local.get $ret) (i32.const 0)))

    (func (export "composer_compute_verification_key") (param $ret i32) (param i32) (param i32)
        (i32.store (local.get $ret) (i32.const 8))
        (i32.store offset=4 (local.get $ret) (i32.const 0))
        (i32.store offset=8 (local.get $ret) (i32.const 0)))

    (func (export "composer_create_proof")
        (param $ret i32) (param i32) (param i32) (param $ptr i32) (param $len i32)
        (call $ret_bytes (local.get $ret) (local.get $ptr) (local.get $len))
        (i32.store offset=8 (local.get $ret) (i32.const 0))
        (i32.store offset=12 (local.get $ret) (i32.const 0)))

    (func (export "composer_verify")
        (param $ret i32) (param i32) (param i32)
        (param $proof i32) (param $proof_len i32) (param i32) (param i32)
        (i32.store (local.get $ret)
            (i32.and
                (i32.ne (local.get $proof_len) (i32.const 0))
                (i32.eq (i32.load8_u (local.get $proof)) (i32.const 1))))
        (i32.store offset=4 (local.get $ret) (i32.const 0))
        (i32.store offset=8 (local.get $ret) (i32.const 0)))
"#;

/// Closure trampolines plus a `serialise_acir_to_circuit` that registers a
/// closure by pushing it into the ACIR array. The closure echoes its
/// argument.
const CLOSURES: &str = r#"
    (func (export "__pb_closure_invoke")
        (param $invoke i32) (param $ret i32) (param $data i32) (param $vtable i32) (param $arg i32)
        (i32.store (local.get $ret) (call $clone (local.get $arg)))
        (i32.store offset=4 (local.get $ret) (i32.const 0))
        (i32.store offset=8 (local.get $ret) (i32.const 0)))

    (func (export "__pb_closure_destroy") (param i32 i32 i32)
        (global.set $destroyed (i32.add (global.get $destroyed) (i32.const 1))))

    (func (export "serialise_acir_to_circuit") (param $ret i32) (param $acir i32)
        (local $closure i32)
        (local.set $closure (call $closure_new (i32.const 100) (i32.const 200) (i32.const 1) (i32.const 2) (i32.const 1)))
        (drop (call $array_push (local.get $acir) (local.get $closure)))
        (call $drop (local.get $closure))
        (call $ret_bytes (local.get $ret) (i32.const 0) (i32.const 0)))
"#;

pub fn engine_wat() -> String {
    format!("(module {} {})", RUNTIME, SURFACE)
}

pub fn closure_engine_wat() -> String {
    format!("(module {} {})", RUNTIME, CLOSURES)
}

pub fn load_sandbox(config: EngineConfig) -> Sandbox {
    Sandbox::new(engine_wat(), config).unwrap()
}

/// A fresh mock engine with default limits.
pub fn engine() -> WasmEngine {
    load_sandbox(EngineConfig::default()).instantiate().unwrap()
}

pub fn engine_with(config: EngineConfig) -> WasmEngine {
    load_sandbox(config).instantiate().unwrap()
}

pub fn closure_engine() -> WasmEngine {
    Sandbox::new(closure_engine_wat(), EngineConfig::default())
        .unwrap()
        .instantiate()
        .unwrap()
}

/// Decode little-endian 32-bit words.
pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
