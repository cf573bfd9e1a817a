//! # cyfr-engine - Policy-Enforced Execution Engine for WASM Components
//!
//! This crate executes sandboxed WebAssembly components under
//! administrator-defined policies. An execution takes a typed component
//! reference plus a JSON input, resolves the binary, enforces the policy
//! (domain/method allowlists, rate limit, memory/CPU caps, secret and
//! tool grants), runs the component with mediated host functions as its
//! only I/O, masks secret material out of the output, writes
//! tamper-evident execution records, and emits telemetry. Past executions
//! can be deterministically replayed for forensics.
//!
//! ## Component types
//!
//! - **Reagent**: pure compute, no I/O beyond stdio
//! - **Catalyst**: mediated HTTP and secrets; requires a policy with a
//!   non-empty domain allowlist
//! - **Formula**: orchestration: invokes other components and optionally
//!   calls mediated tools
//!
//! ## Architecture
//!
//! The crate is organized into five root modules with one-way imports:
//!
//! ```text
//! exec/ ──► runtime/ ──► host/ ──► security/ ──► core/
//!    │          │           │           │           │
//!    └──────────┴───────────┴───────────┴───────────┘
//!                   All can import from core/
//! ```
//!
//! - **core/** - foundation: references, policies, records, storage and
//!   telemetry contracts (imports nothing internal)
//! - **security/** - policy cache, rate limiter, secrets, masking, SSRF,
//!   signatures (imports core/)
//! - **host/** - JSON-mediated host functions (imports security/, core/)
//! - **runtime/** - Wasmtime integration (imports host/, security/, core/)
//! - **exec/** - the orchestrator and replay (imports everything)
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cyfr_engine::prelude::*;
//!
//! # async fn demo() -> EngineResult<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! let executor = Executor::builder(storage).build()?;
//!
//! let ctx = Context::new("user-1", "org-1");
//! let reference = Reference::Registry("reagent:local.sum:1.0.0".to_string());
//! let result = executor.run(&ctx, reference, serde_json::json!({"a": 5, "b": 3})).await?;
//! println!("{} -> {}", result.execution_id, result.output);
//! # Ok(())
//! # }
//! ```

// Foundation layer (no internal dependencies)
pub mod core;

// Security layer (imports from core/)
pub mod security;

// Host-function layer (imports from security/, core/)
pub mod host;

// WASM execution layer (imports from host/, security/, core/)
pub mod runtime;

// Orchestration layer (imports from all lower layers)
pub mod exec;

// Prelude - common re-exports for ergonomic use
pub mod prelude;

pub use crate::core::error::{EngineError, EngineResult};
pub use crate::exec::executor::{Executor, RunOptions};
