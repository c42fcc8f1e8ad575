//! The composer primitives the pipeline drives.

use proofbridge_sandbox::{ComposerId, KeyId, SandboxError, WasmEngine};

/// An engine able to build and check proofs.
///
/// `WasmEngine` is the production implementation. Errors use the sandbox
/// taxonomy so that fatal faults can be told apart from exceptions the
/// engine raised on purpose.
pub trait ProvingEngine {
    fn composer_new(&mut self, constraint_system: &[u8]) -> Result<ComposerId, SandboxError>;

    fn composer_free(&mut self, composer: ComposerId) -> Result<(), SandboxError>;

    fn key_free(&mut self, key: KeyId) -> Result<(), SandboxError>;

    fn circuit_size(&mut self, composer: ComposerId) -> Result<u32, SandboxError>;

    fn init_reference_data(
        &mut self,
        composer: ComposerId,
        size: u32,
        g1: &[u8],
        g2: &[u8],
    ) -> Result<(), SandboxError>;

    fn create_multiscalar_setup(&mut self, composer: ComposerId) -> Result<(), SandboxError>;

    fn compute_proving_key(&mut self, composer: ComposerId) -> Result<KeyId, SandboxError>;

    fn compute_verification_key(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
    ) -> Result<KeyId, SandboxError>;

    fn create_proof(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
        witness: &[u8],
    ) -> Result<Vec<u8>, SandboxError>;

    fn verify(
        &mut self,
        composer: ComposerId,
        verification_key: KeyId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, SandboxError>;
}

impl ProvingEngine for WasmEngine {
    fn composer_new(&mut self, constraint_system: &[u8]) -> Result<ComposerId, SandboxError> {
        WasmEngine::composer_new(self, constraint_system)
    }

    fn composer_free(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        WasmEngine::composer_free(self, composer)
    }

    fn key_free(&mut self, key: KeyId) -> Result<(), SandboxError> {
        WasmEngine::key_free(self, key)
    }

    fn circuit_size(&mut self, composer: ComposerId) -> Result<u32, SandboxError> {
        WasmEngine::circuit_size(self, composer)
    }

    fn init_reference_data(
        &mut self,
        composer: ComposerId,
        size: u32,
        g1: &[u8],
        g2: &[u8],
    ) -> Result<(), SandboxError> {
        WasmEngine::init_reference_data(self, composer, size, g1, g2)
    }

    fn create_multiscalar_setup(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        WasmEngine::create_multiscalar_setup(self, composer)
    }

    fn compute_proving_key(&mut self, composer: ComposerId) -> Result<KeyId, SandboxError> {
        WasmEngine::compute_proving_key(self, composer)
    }

    fn compute_verification_key(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
    ) -> Result<KeyId, SandboxError> {
        WasmEngine::compute_verification_key(self, composer, proving_key)
    }

    fn create_proof(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
        witness: &[u8],
    ) -> Result<Vec<u8>, SandboxError> {
        WasmEngine::create_proof(self, composer, proving_key, witness)
    }

    fn verify(
        &mut self,
        composer: ComposerId,
        verification_key: KeyId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, SandboxError> {
        WasmEngine::verify(self, composer, verification_key, proof, public_inputs)
    }
}
