//! Storage collaborator contract.
//!
//! The metadata store (SQL/on-disk CRUD for records, secrets, policies,
//! sessions) is an external collaborator. This module defines only the
//! surface the engine consumes, plus [`MemoryStorage`], an in-process
//! implementation used by unit tests and single-node deployments.
//!
//! All record writes are idempotent upserts at the store level; the engine
//! may replay a terminal write after a crash without corrupting audit data.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::RwLock;

// Layer 3: Internal module imports
use crate::core::context::Context;
use crate::core::error::EngineResult;
use crate::core::policy::Policy;
use crate::core::record::{ExecutionRecord, ExecutionStatus};
use crate::core::reference::ComponentRef;

/// Secrets granted to one `(user, component)` pair.
///
/// `failed` lists granted names whose values could not be materialized;
/// any entry there is fatal to the execution and must be reported verbatim.
#[derive(Debug, Clone, Default)]
pub struct GrantedSecrets {
    /// Resolved name → plaintext value
    pub secrets: HashMap<String, String>,
    /// Granted names that failed to resolve
    pub failed: Vec<String>,
}

/// Filter for execution listings.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Only records for this user
    pub user_id: Option<String>,
    /// Only records in this status
    pub status: Option<ExecutionStatus>,
    /// Only records for this canonical component reference
    pub component_ref: Option<String>,
    /// Maximum number of records to return
    pub limit: Option<usize>,
}

/// The surface of the metadata store the engine consumes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the policy for a component, `None` when unset.
    async fn get_policy(&self, component_ref: &ComponentRef) -> EngineResult<Option<Policy>>;

    /// Persist a record that entered the `running` state (idempotent upsert).
    async fn put_execution_started(&self, record: &ExecutionRecord) -> EngineResult<()>;

    /// Persist a record that completed (idempotent upsert).
    async fn put_execution_completed(&self, record: &ExecutionRecord) -> EngineResult<()>;

    /// Persist a record that failed or was cancelled (idempotent upsert).
    async fn put_execution_failed(&self, record: &ExecutionRecord) -> EngineResult<()>;

    /// Load a record by id.
    async fn get_execution(&self, id: &str) -> EngineResult<Option<ExecutionRecord>>;

    /// List records matching `filter`, newest first.
    async fn list_executions(&self, filter: &ExecutionFilter) -> EngineResult<Vec<ExecutionRecord>>;

    /// Materialize every secret granted to `(user, component)`.
    async fn resolve_granted_secrets(
        &self,
        ctx: &Context,
        component_ref: &ComponentRef,
    ) -> EngineResult<GrantedSecrets>;
}

#[derive(Default)]
struct MemoryState {
    policies: HashMap<String, Policy>,
    executions: HashMap<String, ExecutionRecord>,
    /// Insertion order of execution ids, for newest-first listings
    execution_order: Vec<String>,
    secret_values: HashMap<String, String>,
    /// `(secret_name, canonical_ref)` grant relation; idempotent on insert
    grants: Vec<(String, String)>,
}

/// In-process [`Storage`] implementation.
///
/// Backs unit tests and single-node deployments. Policies, records, secret
/// values, and grants live in maps behind one `RwLock`; writes are upserts,
/// matching the idempotency contract of the real store.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a policy.
    pub fn set_policy(&self, component_ref: &ComponentRef, policy: Policy) {
        self.state
            .write()
            .policies
            .insert(component_ref.to_string(), policy);
    }

    /// Remove a policy.
    pub fn delete_policy(&self, component_ref: &ComponentRef) {
        self.state.write().policies.remove(&component_ref.to_string());
    }

    /// Store a secret value.
    pub fn set_secret(&self, name: impl Into<String>, value: impl Into<String>) {
        self.state.write().secret_values.insert(name.into(), value.into());
    }

    /// Grant a secret to a component. Idempotent.
    pub fn grant(&self, secret_name: impl Into<String>, component_ref: &ComponentRef) {
        let entry = (secret_name.into(), component_ref.to_string());
        let mut state = self.state.write();
        if !state.grants.contains(&entry) {
            state.grants.push(entry);
        }
    }

    fn upsert(&self, record: &ExecutionRecord) {
        let mut state = self.state.write();
        if !state.executions.contains_key(&record.id) {
            state.execution_order.push(record.id.clone());
        }
        state.executions.insert(record.id.clone(), record.clone());
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_policy(&self, component_ref: &ComponentRef) -> EngineResult<Option<Policy>> {
        Ok(self.state.read().policies.get(&component_ref.to_string()).cloned())
    }

    async fn put_execution_started(&self, record: &ExecutionRecord) -> EngineResult<()> {
        self.upsert(record);
        Ok(())
    }

    async fn put_execution_completed(&self, record: &ExecutionRecord) -> EngineResult<()> {
        self.upsert(record);
        Ok(())
    }

    async fn put_execution_failed(&self, record: &ExecutionRecord) -> EngineResult<()> {
        self.upsert(record);
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> EngineResult<Option<ExecutionRecord>> {
        Ok(self.state.read().executions.get(id).cloned())
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> EngineResult<Vec<ExecutionRecord>> {
        let state = self.state.read();
        let mut records: Vec<ExecutionRecord> = state
            .execution_order
            .iter()
            .rev()
            .filter_map(|id| state.executions.get(id))
            .filter(|r| filter.user_id.as_deref().is_none_or(|u| r.user_id == u))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| match filter.component_ref.as_deref() {
                None => true,
                Some(c) => r
                    .reference
                    .component_ref()
                    .map(|x| x.to_string() == c)
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn resolve_granted_secrets(
        &self,
        _ctx: &Context,
        component_ref: &ComponentRef,
    ) -> EngineResult<GrantedSecrets> {
        let state = self.state.read();
        let canonical = component_ref.to_string();
        let mut resolved = GrantedSecrets::default();
        for (name, granted_to) in &state.grants {
            if *granted_to != canonical {
                continue;
            }
            match state.secret_values.get(name) {
                Some(value) => {
                    resolved.secrets.insert(name.clone(), value.clone());
                }
                None => resolved.failed.push(name.clone()),
            }
        }
        Ok(resolved)
    }
}
