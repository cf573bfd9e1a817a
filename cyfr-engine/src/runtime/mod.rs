//! # Runtime Module
//!
//! Wasmtime integration: engine configuration, per-type import assembly,
//! resource limiting, and the canonical-export call convention.
//!
//! Imports from `host/`, `security/`, and `core/`.

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::core::error::EngineResult;

pub mod engine;
pub mod limiter;
pub mod linker;

pub use engine::{HostImports, HostState, RuntimeOpts, WasmRuntime};
pub use limiter::apply_limits_to_store;

/// Executes one component binary to completion.
///
/// The trait seam lets the orchestrator run against a mock in tests; the
/// production implementation is [`WasmRuntime`].
#[async_trait]
pub trait ComponentRuntime: Send + Sync {
    /// Instantiate `binary`, call its canonical export with `input`
    /// (serialized JSON), and return the parsed output.
    ///
    /// Traps and resource exhaustion surface as structured errors; the
    /// wall-clock deadline is enforced by the caller.
    async fn execute(
        &self,
        binary: &[u8],
        input: &str,
        opts: RuntimeOpts,
    ) -> EngineResult<serde_json::Value>;
}
