//! Common re-exports.
//!
//! `use cyfr_engine::prelude::*;` pulls in the types almost every
//! embedder needs: the executor, the core data model, and the
//! collaborator traits.

pub use crate::core::config::EngineConfig;
pub use crate::core::context::Context;
pub use crate::core::error::{EngineError, EngineResult};
pub use crate::core::policy::{Policy, RateLimitConfig};
pub use crate::core::record::{ExecutionRecord, ExecutionResult, ExecutionStatus};
pub use crate::core::reference::{ComponentRef, ComponentType, Reference};
pub use crate::core::storage::{ExecutionFilter, MemoryStorage, Storage};
pub use crate::core::telemetry::{TelemetryEvent, TelemetrySink};
pub use crate::exec::executor::{Executor, RunOptions};
pub use crate::exec::fetcher::RegistryClient;
pub use crate::exec::replay::{ReplayReport, ReplayVerification};
pub use crate::host::mcp::{McpToolHandler, McpToolRegistry};
pub use crate::runtime::{ComponentRuntime, WasmRuntime};
