//! WASM module validation: ABI compatibility checks.
//!
//! Validates that a compiled engine module meets the boundary ABI before it
//! can be instantiated. Checks:
//!
//! 1. `memory` export present
//! 2. Allocator, stack-pointer and exception-store exports present with
//!    correct signatures
//! 3. Optional surface exports, when present, have correct signatures
//! 4. All imports are functions from the `proofbridge_host` module
//! 5. No WASI imports

use wasmtime::{ExternType, Module, ValType};

use crate::error::SandboxError;

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, i32 param count, i32 result count).
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("__pb_malloc", 1, 1),
    ("__pb_realloc", 3, 1),
    ("__pb_free", 2, 0),
    ("__pb_add_to_stack_pointer", 1, 1),
    ("__pb_exn_store", 1, 0),
];

/// Entry points an engine may omit. Calling a missing one is an error at
/// call time, not at load time.
const OPTIONAL_EXPORTS: &[(&str, usize, usize)] = &[
    ("__pb_closure_invoke", 5, 0),
    ("__pb_closure_destroy", 3, 0),
    ("compute_witnesses", 4, 0),
    ("serialise_acir_to_circuit", 2, 0),
    ("packed_witness_to_witness", 4, 0),
    ("eth_contract_from_cs", 3, 0),
    ("serialise_public_inputs", 3, 0),
    ("composer_new", 2, 1),
    ("composer_free", 1, 0),
    ("key_free", 1, 0),
    ("composer_circuit_size", 1, 1),
    ("composer_init_reference_data", 7, 0),
    ("composer_create_multiscalar_setup", 2, 0),
    ("composer_compute_proving_key", 2, 0),
    ("composer_compute_verification_key", 3, 0),
    ("composer_create_proof", 5, 0),
    ("composer_verify", 7, 0),
];

/// Allowed import module name.
pub const HOST_MODULE: &str = "proofbridge_host";

/// Validate that an engine module meets the boundary ABI.
pub fn validate_module(module: &Module) -> Result<(), SandboxError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

/// Check that all required exports are present and every known export has
/// the right signature.
fn validate_exports(module: &Module) -> Result<(), SandboxError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(SandboxError::ValidationError(
            "module must export 'memory'".into(),
        ));
    }

    for &(name, params, results) in REQUIRED_EXPORTS {
        let export = module.get_export(name).ok_or_else(|| {
            SandboxError::ValidationError(format!("missing required export: {}", name))
        })?;
        check_signature(name, &export, params, results)?;
    }

    for &(name, params, results) in OPTIONAL_EXPORTS {
        if let Some(export) = module.get_export(name) {
            check_signature(name, &export, params, results)?;
        }
    }

    Ok(())
}

fn check_signature(
    name: &str,
    export: &ExternType,
    expected_params: usize,
    expected_results: usize,
) -> Result<(), SandboxError> {
    let func_ty = match export {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(SandboxError::ValidationError(format!(
                "export '{}' must be a function",
                name
            )));
        }
    };

    let params: Vec<ValType> = func_ty.params().collect();
    let results: Vec<ValType> = func_ty.results().collect();

    if params.len() != expected_params || !params.iter().all(is_i32) {
        return Err(SandboxError::ValidationError(format!(
            "export '{}' has wrong param signature: expected {} i32 params, got {} params",
            name,
            expected_params,
            params.len()
        )));
    }

    if results.len() != expected_results || !results.iter().all(is_i32) {
        return Err(SandboxError::ValidationError(format!(
            "export '{}' has wrong result signature: expected {} i32 results, got {} results",
            name,
            expected_results,
            results.len()
        )));
    }

    Ok(())
}

/// Check that all imports are functions from `proofbridge_host` and none
/// are WASI.
fn validate_imports(module: &Module) -> Result<(), SandboxError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(SandboxError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != HOST_MODULE {
            return Err(SandboxError::ValidationError(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                HOST_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(SandboxError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}
