//! Prover error types.

use std::path::PathBuf;

use proofbridge_sandbox::SandboxError;

use crate::pipeline::Stage;

/// Failure fetching or validating reference data.
#[derive(Debug, thiserror::Error)]
pub enum CrsError {
    #[error("failed to build range request for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered something other than 206 Partial Content.
    #[error("unexpected status {status} from {url}, expected 206")]
    Status { url: String, status: u16 },

    /// The body length does not match the requested range.
    #[error("range {start}-{end} of {source_name}: expected {expected} bytes, got {actual}")]
    Length {
        source_name: String,
        start: u64,
        end: u64,
        expected: u64,
        actual: u64,
    },

    #[error("requested {requested} G1 points, transcript holds {available}")]
    TooManyPoints { requested: u64, available: u64 },

    #[error("failed to read transcript {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed transcript manifest: {0}")]
    Manifest(String),

    #[error("failed to serialize CRS: {0}")]
    Serialize(#[source] bincode::Error),

    #[error("failed to deserialize CRS: {0}")]
    Deserialize(#[source] bincode::Error),
}

/// Failure driving the proof pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A step was called before the steps it depends on.
    #[error("{operation} requires {required:?}, pipeline is at {current:?}")]
    OutOfOrder {
        operation: &'static str,
        required: Stage,
        current: Stage,
    },

    /// Structurally invalid host-side input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Engine(#[from] SandboxError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    /// An earlier engine fault left the pipeline unusable.
    #[error("pipeline poisoned by earlier engine fault: {0}")]
    Poisoned(String),
}

impl PipelineError {
    /// Whether the pipeline that produced this error is unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Engine(err) => err.is_fatal(),
            Self::Poisoned(_) => true,
            _ => false,
        }
    }
}
