//! Eager secret resolution.
//!
//! Secrets are materialized exactly once per execution, before the runtime
//! starts, into a [`ResolvedSecrets`] map owned by that execution. A
//! resolution failure is fatal to the execution and cites the ungranted
//! names verbatim. Plaintext exists only for the lifetime of one execution
//! and never appears in logs: the map's `Debug` output redacts values.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// Layer 3: Internal module imports
use crate::core::context::Context;
use crate::core::error::{EngineError, EngineResult};
use crate::core::reference::ComponentRef;
use crate::core::storage::Storage;

/// Plaintext secrets for one execution.
///
/// Owned by the execution that resolved them; host functions receive a
/// shared read-only handle.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    values: HashMap<String, String>,
}

impl ResolvedSecrets {
    /// Wrap an already-materialized map.
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Look up one secret by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// All plaintext values, for output masking.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.values().map(String::as_str)
    }

    /// Number of resolved secrets.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no secrets were resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Names only; values must never leak through Debug formatting.
        f.debug_struct("ResolvedSecrets")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Materializes the full set of granted secrets, once per execution.
pub struct SecretResolver {
    storage: Arc<dyn Storage>,
}

impl SecretResolver {
    /// Create a resolver over the metadata store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve every secret granted to `(user, component)`.
    ///
    /// # Errors
    ///
    /// `access_denied` naming each unresolvable grant; the caller fails the
    /// execution before the runtime starts.
    pub async fn resolve(
        &self,
        ctx: &Context,
        component_ref: &ComponentRef,
    ) -> EngineResult<ResolvedSecrets> {
        let granted = self.storage.resolve_granted_secrets(ctx, component_ref).await?;
        if !granted.failed.is_empty() {
            return Err(EngineError::access_denied(format!(
                "failed to resolve secrets [{}] for {component_ref}",
                granted.failed.join(", ")
            )));
        }
        Ok(ResolvedSecrets::from_map(granted.secrets))
    }
}
