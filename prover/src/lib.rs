//! `proofbridge-prover`: reference data and ordered proof construction.
//!
//! - [`crs`]: transcript byte ranges, manifest, HTTP and file fetchers
//! - [`ProvingEngine`]: composer primitives, implemented by `WasmEngine`
//! - [`ProofPipeline`]: the stage machine from constraint system to
//!   verified proof

pub mod config;
pub mod crs;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::CrsConfig;
pub use crs::{Crs, CrsLoader, CrsRange, FileFetcher, HttpFetcher, RangeFetcher, TranscriptManifest};
pub use engine::ProvingEngine;
pub use error::{CrsError, PipelineError};
pub use pipeline::{ProofPipeline, Stage};
pub use types::{
    Assignment, ConstraintSystem, FieldElement, Proof, ProvingKey, VerificationKey,
    VerificationOutcome,
};
