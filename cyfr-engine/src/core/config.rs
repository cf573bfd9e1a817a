//! Engine configuration.
//!
//! [`EngineConfig`] collects every tunable the engine consults at run time:
//! per-type wall-clock defaults, resource caps, host-function body caps,
//! stream limits, the formula recursion cap, and signature enforcement.
//! All defaults are exposed as public constants so deployments can build
//! custom configurations relative to the standard values, and the whole
//! struct deserializes from TOML for file-based configuration.
//!
//! # Examples
//!
//! ```
//! use cyfr_engine::core::config::{EngineConfig, DEFAULT_CATALYST_TIMEOUT_MS};
//!
//! let config = EngineConfig {
//!     catalyst_timeout_ms: DEFAULT_CATALYST_TIMEOUT_MS / 2,
//!     ..EngineConfig::default()
//! };
//! assert!(!config.enforce_signatures);
//! ```

// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::reference::ComponentType;

/// Default wall-clock cap for catalysts (3 minutes).
pub const DEFAULT_CATALYST_TIMEOUT_MS: u64 = 180_000;

/// Default wall-clock cap for formulas (5 minutes).
pub const DEFAULT_FORMULA_TIMEOUT_MS: u64 = 300_000;

/// Default wall-clock cap for reagents (1 minute).
pub const DEFAULT_REAGENT_TIMEOUT_MS: u64 = 60_000;

/// Default linear-memory cap (64 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Default fuel budget (instruction-count proxy).
pub const DEFAULT_MAX_FUEL: u64 = 100_000_000;

/// Fuel consumed between async yield points; lets the wall-clock deadline
/// interrupt a busy instance.
pub const DEFAULT_FUEL_YIELD_INTERVAL: u64 = 100_000;

/// Default cap on host-function request bodies and execution inputs (10 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Default cap on host-function response bodies (10 MiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Fallback per-request HTTP timeout when the policy sets none (30 s).
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Global per-stream deadline, independent of request timeouts (60 s).
pub const DEFAULT_STREAM_DEADLINE_MS: u64 = 60_000;

/// Concurrent streams allowed per execution.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 3;

/// Maximum formula sub-invocation depth.
pub const DEFAULT_MAX_FORMULA_DEPTH: u32 = 8;

/// Policy cache entry time-to-live (30 s).
pub const DEFAULT_POLICY_CACHE_TTL_MS: u64 = 30_000;

/// Policy cache capacity (entries).
pub const DEFAULT_POLICY_CACHE_CAPACITY: usize = 256;

/// Tunables the engine consults at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock cap for catalysts without a policy timeout
    pub catalyst_timeout_ms: u64,
    /// Wall-clock cap for formulas without a policy timeout
    pub formula_timeout_ms: u64,
    /// Wall-clock cap for reagents without a policy timeout
    pub reagent_timeout_ms: u64,

    /// Linear-memory cap when the policy sets none
    pub max_memory_bytes: u64,
    /// Fuel budget per execution
    pub max_fuel: u64,
    /// Fuel consumed between async yield points
    pub fuel_yield_interval: u64,

    /// Cap on host-function request bodies and execution inputs
    pub max_request_size: usize,
    /// Cap on host-function response bodies
    pub max_response_size: usize,
    /// Fallback HTTP timeout when the policy sets none
    pub http_timeout_ms: u64,
    /// Global per-stream deadline
    pub stream_deadline_ms: u64,
    /// Concurrent streams per execution
    pub max_concurrent_streams: usize,

    /// Formula sub-invocation depth cap
    pub max_formula_depth: u32,

    /// Policy cache TTL
    pub policy_cache_ttl_ms: u64,
    /// Policy cache capacity
    pub policy_cache_capacity: usize,

    /// Require signature verification for registry/OCI references
    pub enforce_signatures: bool,

    /// Skip the private-address check on mediated HTTP. Development and
    /// test environments only; never enable in production
    pub allow_private_networks: bool,

    /// Filesystem roots local references may resolve under; empty
    /// allows any absolute path (development mode)
    pub local_roots: Vec<PathBuf>,
    /// Root directory of the user object store backing `arca` references
    pub arca_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalyst_timeout_ms: DEFAULT_CATALYST_TIMEOUT_MS,
            formula_timeout_ms: DEFAULT_FORMULA_TIMEOUT_MS,
            reagent_timeout_ms: DEFAULT_REAGENT_TIMEOUT_MS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_fuel: DEFAULT_MAX_FUEL,
            fuel_yield_interval: DEFAULT_FUEL_YIELD_INTERVAL,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            stream_deadline_ms: DEFAULT_STREAM_DEADLINE_MS,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            max_formula_depth: DEFAULT_MAX_FORMULA_DEPTH,
            policy_cache_ttl_ms: DEFAULT_POLICY_CACHE_TTL_MS,
            policy_cache_capacity: DEFAULT_POLICY_CACHE_CAPACITY,
            enforce_signatures: false,
            allow_private_networks: false,
            local_roots: Vec::new(),
            arca_root: None,
        }
    }
}

impl EngineConfig {
    /// Default wall-clock cap for a component type.
    pub fn timeout_for(&self, component_type: ComponentType) -> u64 {
        match component_type {
            ComponentType::Catalyst => self.catalyst_timeout_ms,
            ComponentType::Formula => self.formula_timeout_ms,
            ComponentType::Reagent => self.reagent_timeout_ms,
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text)
            .map_err(|e| EngineError::decode_error(format!("invalid engine config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.catalyst_timeout_ms, DEFAULT_CATALYST_TIMEOUT_MS);
        assert_eq!(config.max_concurrent_streams, DEFAULT_MAX_CONCURRENT_STREAMS);
        assert_eq!(config.max_formula_depth, DEFAULT_MAX_FORMULA_DEPTH);
        assert!(!config.enforce_signatures);
    }

    #[test]
    fn test_timeout_for_type() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout_for(ComponentType::Catalyst), 180_000);
        assert_eq!(config.timeout_for(ComponentType::Formula), 300_000);
        assert_eq!(config.timeout_for(ComponentType::Reagent), 60_000);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_memory_bytes = 33554432
            enforce_signatures = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_memory_bytes, 32 * 1024 * 1024);
        assert!(config.enforce_signatures);
        // Untouched fields keep their defaults.
        assert_eq!(config.http_timeout_ms, DEFAULT_HTTP_TIMEOUT_MS);
    }

    #[test]
    fn test_toml_rejects_malformed() {
        assert!(EngineConfig::from_toml_str("max_memory_bytes = \"lots\"").is_err());
    }
}
