//! Pre-flight policy evaluation.
//!
//! [`PolicyEnforcer::build_execution_opts`] turns the stored policy (or
//! its absence) into the concrete caps one execution runs under. The
//! catalyst rules are hard preconditions: no policy, or a policy with an
//! empty domain allowlist, rejects the execution before any binary is
//! fetched. Reagents and formulas run with type defaults when no policy
//! exists.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tracing::warn;

// Layer 3: Internal module imports
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::policy::Policy;
use crate::core::reference::{ComponentRef, ComponentType};
use crate::security::policy_cache::PolicyCache;

/// Concrete caps for one execution, derived from policy + defaults.
#[derive(Debug, Clone)]
pub struct ExecutionOpts {
    /// The evaluated policy; becomes the record's `host_policy_snapshot`
    pub policy: Policy,
    /// Whether a stored policy existed (vs. type defaults)
    pub policy_found: bool,
    /// Wall-clock deadline in milliseconds
    pub timeout_ms: u64,
    /// Linear-memory cap in bytes
    pub max_memory_bytes: u64,
    /// Input / host-request body cap in bytes
    pub max_request_size: usize,
}

/// Builds [`ExecutionOpts`] from the policy cache and engine defaults.
pub struct PolicyEnforcer {
    cache: Arc<PolicyCache>,
    config: EngineConfig,
}

impl PolicyEnforcer {
    /// Create an enforcer over the policy cache.
    pub fn new(cache: Arc<PolicyCache>, config: EngineConfig) -> Self {
        Self { cache, config }
    }

    /// Evaluate the policy for one execution.
    ///
    /// # Errors
    ///
    /// - `policy_missing` for a catalyst without a stored policy
    /// - `no_allowed_domains` for a catalyst whose policy allows no domains
    /// - `decode_error` for a malformed policy timeout
    pub async fn build_execution_opts(
        &self,
        component_ref: &ComponentRef,
        component_type: ComponentType,
    ) -> EngineResult<ExecutionOpts> {
        let (policy, policy_found) = match component_type {
            ComponentType::Catalyst => {
                let policy = self
                    .cache
                    .get(component_ref)
                    .await?
                    .ok_or_else(|| EngineError::policy_missing(component_ref.to_string()))?;
                if policy.allowed_domains.is_empty() {
                    return Err(EngineError::no_allowed_domains(component_ref.to_string()));
                }
                (policy, true)
            }
            ComponentType::Reagent | ComponentType::Formula => {
                // Best-effort: a store hiccup must not block pure compute.
                match self.cache.get(component_ref).await {
                    Ok(Some(policy)) => (policy, true),
                    Ok(None) => (Policy::default(), false),
                    Err(err) => {
                        warn!(
                            component_ref = %component_ref,
                            error = %err,
                            "policy lookup failed; falling back to type defaults"
                        );
                        (Policy::default(), false)
                    }
                }
            }
        };

        let timeout_ms = policy
            .timeout_ms()?
            .unwrap_or_else(|| self.config.timeout_for(component_type));

        Ok(ExecutionOpts {
            timeout_ms,
            max_memory_bytes: policy.max_memory_bytes.unwrap_or(self.config.max_memory_bytes),
            max_request_size: policy.max_request_size.unwrap_or(self.config.max_request_size),
            policy,
            policy_found,
        })
    }
}
