//! Engine configuration.

use proofbridge_interop::handles::DEFAULT_SCRATCH_CAPACITY;

/// Configuration for one engine instance.
///
/// Controls memory limits, instruction fuel and the size of the per-call
/// scratch handle region.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel limit (instruction metering). Key derivation on large
    /// circuits is expensive, so the default is generous.
    pub fuel_limit: u64,

    /// Number of handle slots reserved for values borrowed by one call.
    pub scratch_capacity: u32,

    /// Forward guest `console_error` output to the host log.
    pub enable_guest_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            fuel_limit: 10_000_000_000,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            enable_guest_logs: false,
        }
    }
}

impl EngineConfig {
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_pages as usize * 65536
    }
}
