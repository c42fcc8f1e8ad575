//! Ordered proof construction.
//!
//! ```text
//! Empty -> HasConstraintSystem -> HasComposer -> SizeKnown -> CrsLoaded
//!       -> MultiScalarSetupReady -> HasProvingKey -> HasProof
//! ```
//!
//! A verification key can be derived once a proving key exists; `verify`
//! needs one. Calling a step early is an [`PipelineError::OutOfOrder`]
//! error and leaves the pipeline untouched. A fatal engine error poisons
//! the pipeline.

use proofbridge_sandbox::{ComposerId, KeyId, SandboxError};

use crate::crs::{g1_range, Crs, CrsLoader, RangeFetcher};
use crate::engine::ProvingEngine;
use crate::error::PipelineError;
use crate::types::{
    Assignment, ConstraintSystem, Proof, ProvingKey, VerificationKey, VerificationOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Empty,
    HasConstraintSystem,
    HasComposer,
    SizeKnown,
    CrsLoaded,
    MultiScalarSetupReady,
    HasProvingKey,
    HasProof,
    /// Side branch: reachable from `HasProvingKey` onward, never the
    /// pipeline's current stage.
    HasVerificationKey,
}

pub struct ProofPipeline<E: ProvingEngine> {
    engine: E,
    stage: Stage,
    constraint_system: Option<ConstraintSystem>,
    composer: Option<ComposerId>,
    circuit_size: Option<u32>,
    proving_key: Option<ProvingKey>,
    verification_key: Option<VerificationKey>,
    poisoned: Option<String>,
}

impl<E: ProvingEngine> ProofPipeline<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            stage: Stage::Empty,
            constraint_system: None,
            composer: None,
            circuit_size: None,
            proving_key: None,
            verification_key: None,
            poisoned: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn circuit_size(&self) -> Option<u32> {
        self.circuit_size
    }

    pub fn proving_key(&self) -> Option<&ProvingKey> {
        self.proving_key.as_ref()
    }

    pub fn verification_key(&self) -> Option<&VerificationKey> {
        self.verification_key.as_ref()
    }

    pub fn poisoned(&self) -> Option<&str> {
        self.poisoned.as_deref()
    }

    fn require(&self, operation: &'static str, required: Stage) -> Result<(), PipelineError> {
        if let Some(reason) = &self.poisoned {
            return Err(PipelineError::Poisoned(reason.clone()));
        }
        if self.stage < required {
            return Err(PipelineError::OutOfOrder {
                operation,
                required,
                current: self.stage,
            });
        }
        Ok(())
    }

    /// Like `require`, but the step can only be taken from exactly `required`.
    fn require_exactly(
        &self,
        operation: &'static str,
        required: Stage,
    ) -> Result<(), PipelineError> {
        self.require(operation, required)?;
        if self.stage != required {
            return Err(PipelineError::OutOfOrder {
                operation,
                required,
                current: self.stage,
            });
        }
        Ok(())
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "pipeline stage");
        if stage > self.stage {
            self.stage = stage;
        }
    }

    fn engine_error(&mut self, err: SandboxError) -> PipelineError {
        if err.is_fatal() {
            tracing::warn!(reason = %err, "proof pipeline poisoned");
            self.poisoned = Some(err.to_string());
        }
        PipelineError::Engine(err)
    }

    /// Wrap an engine result, poisoning the pipeline on fatal errors.
    fn engine_call<T>(&mut self, result: Result<T, SandboxError>) -> Result<T, PipelineError> {
        result.map_err(|err| self.engine_error(err))
    }

    fn composer(&self) -> Result<ComposerId, PipelineError> {
        self.composer
            .ok_or_else(|| PipelineError::InvalidInput("no composer".into()))
    }

    pub fn set_constraint_system(
        &mut self,
        constraint_system: ConstraintSystem,
    ) -> Result<(), PipelineError> {
        self.require_exactly("set_constraint_system", Stage::Empty)?;
        if constraint_system.as_bytes().is_empty() {
            return Err(PipelineError::InvalidInput("empty constraint system".into()));
        }
        self.constraint_system = Some(constraint_system);
        self.advance(Stage::HasConstraintSystem);
        Ok(())
    }

    pub fn init_composer(&mut self) -> Result<ComposerId, PipelineError> {
        self.require_exactly("init_composer", Stage::HasConstraintSystem)?;
        let cs = self
            .constraint_system
            .take()
            .ok_or_else(|| PipelineError::InvalidInput("no constraint system".into()))?;
        let result = self.engine.composer_new(cs.as_bytes());
        self.constraint_system = Some(cs);
        let composer = self.engine_call(result)?;
        self.composer = Some(composer);
        self.advance(Stage::HasComposer);
        Ok(composer)
    }

    pub fn get_circuit_size(&mut self) -> Result<u32, PipelineError> {
        self.require("get_circuit_size", Stage::HasComposer)?;
        if let Some(size) = self.circuit_size {
            return Ok(size);
        }
        let composer = self.composer()?;
        let result = self.engine.circuit_size(composer);
        let size = self.engine_call(result)?;
        self.circuit_size = Some(size);
        self.advance(Stage::SizeKnown);
        Ok(size)
    }

    /// Hand already-loaded reference data to the composer.
    pub fn init_reference_data(&mut self, crs: &Crs) -> Result<(), PipelineError> {
        self.require_exactly("init_reference_data", Stage::SizeKnown)?;
        let size = self
            .circuit_size
            .ok_or_else(|| PipelineError::InvalidInput("circuit size unknown".into()))?;
        if !crs.covers(u64::from(size)) {
            return Err(PipelineError::InvalidInput(format!(
                "CRS covers {} gates, circuit has {}",
                crs.num_points(),
                size
            )));
        }
        let composer = self.composer()?;
        let g1 = &crs.g1_data()[..g1_range(u64::from(size)).length as usize];
        let result = self.engine.init_reference_data(composer, size, g1, crs.g2_data());
        self.engine_call(result)?;
        self.advance(Stage::CrsLoaded);
        Ok(())
    }

    /// Fetch reference data sized for this circuit and hand it to the
    /// composer.
    pub async fn load_reference_data<F: RangeFetcher>(
        &mut self,
        loader: &CrsLoader<F>,
    ) -> Result<Crs, PipelineError> {
        self.require_exactly("load_reference_data", Stage::SizeKnown)?;
        let size = self
            .circuit_size
            .ok_or_else(|| PipelineError::InvalidInput("circuit size unknown".into()))?;
        let crs = loader.load(u64::from(size)).await?;
        self.init_reference_data(&crs)?;
        Ok(crs)
    }

    pub fn create_multiscalar_setup(&mut self) -> Result<(), PipelineError> {
        self.require_exactly("create_multiscalar_setup", Stage::CrsLoaded)?;
        let composer = self.composer()?;
        let result = self.engine.create_multiscalar_setup(composer);
        self.engine_call(result)?;
        self.advance(Stage::MultiScalarSetupReady);
        Ok(())
    }

    pub fn compute_proving_key(&mut self) -> Result<&ProvingKey, PipelineError> {
        self.require_exactly("compute_proving_key", Stage::MultiScalarSetupReady)?;
        let composer = self.composer()?;
        let result = self.engine.compute_proving_key(composer);
        let key = self.engine_call(result)?;
        self.advance(Stage::HasProvingKey);
        Ok(&*self.proving_key.insert(ProvingKey(key)))
    }

    pub fn compute_verification_key(&mut self) -> Result<&VerificationKey, PipelineError> {
        self.require("compute_verification_key", Stage::HasProvingKey)?;
        let composer = self.composer()?;
        let pk = self.proving_key_id("compute_verification_key")?;
        let result = self.engine.compute_verification_key(composer, pk);
        let key = self.engine_call(result)?;
        if let Some(old) = self.verification_key.take() {
            self.release_key(old.0);
        }
        tracing::debug!(from = ?self.stage, to = ?Stage::HasVerificationKey, "pipeline stage");
        Ok(&*self.verification_key.insert(VerificationKey(key)))
    }

    fn proving_key_id(&self, operation: &'static str) -> Result<KeyId, PipelineError> {
        self.proving_key
            .as_ref()
            .map(ProvingKey::id)
            .ok_or(PipelineError::OutOfOrder {
                operation,
                required: Stage::HasProvingKey,
                current: self.stage,
            })
    }

    pub fn create_proof(&mut self, witness: &Assignment) -> Result<Proof, PipelineError> {
        self.require("create_proof", Stage::HasProvingKey)?;
        let composer = self.composer()?;
        let pk = self.proving_key_id("create_proof")?;
        let result = self.engine.create_proof(composer, pk, &witness.to_bytes());
        let bytes = self.engine_call(result)?;
        self.advance(Stage::HasProof);
        Ok(Proof::from_bytes(bytes))
    }

    /// Check `proof` against `public_inputs` with the derived verification
    /// key. A proof the engine does not accept, including one it raises an
    /// exception over, is `Rejected`.
    pub fn verify(
        &mut self,
        proof: &Proof,
        public_inputs: &Assignment,
    ) -> Result<VerificationOutcome, PipelineError> {
        if let Some(reason) = &self.poisoned {
            return Err(PipelineError::Poisoned(reason.clone()));
        }
        let vk = match &self.verification_key {
            Some(key) => key.0,
            None => {
                return Err(PipelineError::OutOfOrder {
                    operation: "verify",
                    required: Stage::HasVerificationKey,
                    current: self.stage,
                })
            }
        };
        if proof.as_bytes().is_empty() {
            return Err(PipelineError::InvalidInput("empty proof".into()));
        }
        let composer = self.composer()?;
        let result = self
            .engine
            .verify(composer, vk, proof.as_bytes(), &public_inputs.to_bytes());
        let outcome = match result {
            Ok(accepted) => VerificationOutcome::from(accepted),
            Err(err) if err.exception().is_some() => {
                tracing::debug!(reason = %err, "engine raised while verifying");
                VerificationOutcome::Rejected
            }
            Err(err) => return Err(self.engine_error(err)),
        };
        if !outcome.is_accepted() {
            tracing::warn!(proof_len = proof.as_bytes().len(), "proof rejected");
        }
        Ok(outcome)
    }

    fn release_key(&mut self, key: KeyId) {
        if let Err(err) = self.engine.key_free(key) {
            tracing::debug!(error = %err, "failed to release engine key");
        }
    }

    /// Release engine-side keys and composer and return to `Empty`. A
    /// poisoned pipeline stays poisoned.
    pub fn reset(&mut self) {
        if self.poisoned.is_none() {
            if let Some(vk) = self.verification_key.take() {
                self.release_key(vk.0);
            }
            if let Some(pk) = self.proving_key.take() {
                self.release_key(pk.0);
            }
            if let Some(composer) = self.composer.take() {
                if let Err(err) = self.engine.composer_free(composer) {
                    tracing::debug!(error = %err, "failed to release composer");
                }
            }
        }
        self.verification_key = None;
        self.proving_key = None;
        self.composer = None;
        self.constraint_system = None;
        self.circuit_size = None;
        self.stage = Stage::Empty;
        tracing::debug!("pipeline reset");
    }
}

impl<E: ProvingEngine> Drop for ProofPipeline<E> {
    fn drop(&mut self) {
        if self.composer.is_some() {
            self.reset();
        }
    }
}
