//! Reference-data configuration.

use std::env;
use std::path::PathBuf;

pub const TRANSCRIPT_URL_ENV_VAR: &str = "TRANSCRIPT_URL";
pub const TRANSCRIPT_PATH_ENV_VAR: &str = "PROOFBRIDGE_TRANSCRIPT";

/// The first transcript of the public Ignition ceremony.
pub const TRANSCRIPT_URL_FALLBACK: &str =
    "https://aztec-ignition.s3.amazonaws.com/MAIN%20IGNITION/monomial/transcript00.dat";

/// Where reference data is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsConfig {
    pub transcript_url: String,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            transcript_url: TRANSCRIPT_URL_FALLBACK.to_string(),
        }
    }
}

impl CrsConfig {
    /// Read `TRANSCRIPT_URL`, falling back to the public transcript.
    pub fn from_env() -> Self {
        match env::var(TRANSCRIPT_URL_ENV_VAR) {
            Ok(url) if !url.is_empty() => Self { transcript_url: url },
            _ => Self::default(),
        }
    }
}

/// Local transcript named by `PROOFBRIDGE_TRANSCRIPT`, if any.
pub fn transcript_path_from_env() -> Option<PathBuf> {
    env::var_os(TRANSCRIPT_PATH_ENV_VAR)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}
