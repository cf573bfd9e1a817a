//! Execution record lifecycle.
//!
//! An [`ExecutionRecord`] is the append-once audit document for one
//! `run(...)` invocation. It is constructed before any validation happens,
//! enriched during pre-flight (digest, policy snapshot), and finalized
//! exactly once into `completed`, `failed`, or `cancelled`.
//!
//! From the engine's perspective writes are append-only; the metadata store
//! performs idempotent upserts, so replaying a terminal write is harmless.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::policy::Policy;
use crate::core::reference::{ComponentType, Reference};

/// Lifecycle status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Pre-flight passed, the component is (or is about to be) running
    Running,
    /// Finished and produced a (masked) output
    Completed,
    /// Finished with an error
    Failed,
    /// Terminated by a user-initiated cancel
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Append-once lifecycle document for one execution.
///
/// The persisted JSON shape of this struct is a compatibility surface;
/// renaming or dropping fields breaks stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// `exec_<uuid>` identifier
    pub id: String,
    /// Correlation id shared across a formula's sub-invocations
    pub request_id: String,
    /// Lineage: the execution that invoked this one, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,

    /// User the execution ran as
    pub user_id: String,
    /// Resolution address the binary was fetched from
    pub reference: Reference,
    /// Component type inferred from the reference
    pub component_type: ComponentType,
    /// Raw input value (pre-masking; inputs are caller-supplied)
    pub input: serde_json::Value,
    /// `sha256:<hex>` of the serialized input
    pub input_hash: String,

    /// Lifecycle status
    pub status: ExecutionStatus,
    /// Set when pre-flight finished and the run began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// `sha256:<hex>` of the executed binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_digest: Option<String>,
    /// The exact policy evaluated for this execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_policy_snapshot: Option<Policy>,

    /// Set on completion or failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Masked output (secret values already replaced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Single-line failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Construct a fresh record in `running` state.
    ///
    /// A new `exec_<uuid>` id is allocated; `request_id` is generated unless
    /// the caller supplies one (formula sub-invocations pass the parent's).
    pub fn new(
        user_id: impl Into<String>,
        reference: Reference,
        component_type: ComponentType,
        input: serde_json::Value,
        request_id: Option<String>,
        parent_execution_id: Option<String>,
    ) -> Self {
        let input_hash = hash_json(&input);
        Self {
            id: format!("exec_{}", Uuid::new_v4()),
            request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            parent_execution_id,
            user_id: user_id.into(),
            reference,
            component_type,
            input,
            input_hash,
            status: ExecutionStatus::Running,
            started_at: None,
            component_digest: None,
            host_policy_snapshot: None,
            completed_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }

    /// Record pre-run facts: start time, binary digest, policy snapshot.
    pub fn mark_started(&mut self, component_digest: Option<String>, snapshot: Option<Policy>) {
        self.started_at = Some(Utc::now());
        self.component_digest = component_digest;
        self.host_policy_snapshot = snapshot;
    }

    /// Transition `running → completed` with the masked output.
    ///
    /// # Errors
    ///
    /// Fails if the record is already terminal; a record transitions out of
    /// `running` exactly once.
    pub fn mark_completed(
        &mut self,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> EngineResult<()> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.output = Some(output);
        Ok(())
    }

    /// Transition `running → failed` with a single-line error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> EngineResult<()> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    /// Transition `running → cancelled`.
    pub fn mark_cancelled(&mut self) -> EngineResult<()> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.status != ExecutionStatus::Running {
            return Err(EngineError::unexpected(format!(
                "record {} already finalized as {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// Successful outcome of one execution, returned to callers (and to
/// formulas through the `formula/invoke` host function).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Execution record id
    pub execution_id: String,
    /// Masked output
    pub output: serde_json::Value,
    /// `sha256:<hex>` of the executed binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_digest: Option<String>,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
    /// The exact policy evaluated for this execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_policy_snapshot: Option<Policy>,
}

/// `sha256:<hex>` digest of a JSON value's canonical serialization.
pub fn hash_json(value: &serde_json::Value) -> String {
    let serialized = value.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

/// `sha256:<hex>` digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::path::PathBuf;

    use super::*;

    fn new_record() -> ExecutionRecord {
        ExecutionRecord::new(
            "user-1",
            Reference::Local(PathBuf::from(
                "components/reagents/local/sum/1.0.0/reagent.wasm",
            )),
            ComponentType::Reagent,
            serde_json::json!({"a": 5, "b": 3}),
            None,
            None,
        )
    }

    #[test]
    fn test_new_record_shape() {
        let record = new_record();
        assert!(record.id.starts_with("exec_"));
        assert!(!record.request_id.is_empty());
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.input_hash.starts_with("sha256:"));
        assert!(record.started_at.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(new_record().id, new_record().id);
    }

    #[test]
    fn test_complete_lifecycle() {
        let mut record = new_record();
        record.mark_started(Some("sha256:abc".to_string()), Some(Policy::default()));
        record
            .mark_completed(serde_json::json!({"result": 8}), 42)
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.duration_ms, Some(42));
        assert!(record.started_at.unwrap() <= record.completed_at.unwrap());
    }

    #[test]
    fn test_failed_lifecycle() {
        let mut record = new_record();
        record.mark_started(None, None);
        record.mark_failed("Rate limit exceeded. Retry in 60s").unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("Rate limit"));
        assert!(record.output.is_none());
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let mut record = new_record();
        record.mark_completed(serde_json::json!({}), 1).unwrap();
        assert!(record.mark_failed("late error").is_err());
        assert!(record.mark_completed(serde_json::json!({}), 2).is_err());
        assert!(record.mark_cancelled().is_err());
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut record = new_record();
        record.mark_cancelled().unwrap();
        assert!(record.status.is_terminal());
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn test_input_hash_is_deterministic() {
        let a = hash_json(&serde_json::json!({"a": 1}));
        let b = hash_json(&serde_json::json!({"a": 1}));
        assert_eq!(a, b);
        assert_ne!(a, hash_json(&serde_json::json!({"a": 2})));
    }

    #[test]
    fn test_hash_bytes_is_lowercase_sha256() {
        let digest = hash_bytes(b"hello");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest, digest.to_lowercase());
        assert_eq!(digest.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_record_serde_round_trip() {
        let mut record = new_record();
        record.mark_started(Some("sha256:abc".to_string()), None);
        record.mark_completed(serde_json::json!({"ok": true}), 7).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let back: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.status, ExecutionStatus::Completed);
        assert_eq!(back.output, record.output);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
