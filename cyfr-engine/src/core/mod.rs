//! # Core Module
//!
//! Foundational data types shared by all other layers: references,
//! policies, execution records, caller identity, configuration, the
//! storage collaborator contract, and the telemetry surface.
//!
//! Nothing here imports from the other layers.

pub mod config;
pub mod context;
pub mod error;
pub mod policy;
pub mod record;
pub mod reference;
pub mod storage;
pub mod telemetry;

// Re-exports for ergonomic paths (`crate::core::Policy`, ...)
pub use config::EngineConfig;
pub use context::Context;
pub use error::{EngineError, EngineResult};
pub use policy::{Policy, RateLimitConfig};
pub use record::{ExecutionRecord, ExecutionResult, ExecutionStatus};
pub use reference::{ComponentRef, ComponentType, Reference};
pub use storage::{ExecutionFilter, GrantedSecrets, MemoryStorage, Storage};
pub use telemetry::{RecordingTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
