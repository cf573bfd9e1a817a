//! Forensic replay of past executions.
//!
//! `replay` re-fetches the original binary, verifies it still hashes to
//! the recorded digest, re-runs it under the recorded policy snapshot,
//! and structurally compares outputs. The replay instance receives **no**
//! host imports (no HTTP, no secrets, no tools), so a catalyst that
//! depended on the network will mismatch by design; replay is exact for
//! pure compute and best-effort for everything else.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::Serialize;

// Layer 3: Internal module imports
use crate::core::context::Context;
use crate::core::error::{EngineError, EngineResult};
use crate::core::record::{ExecutionRecord, ExecutionStatus};
use crate::runtime::engine::{HostImports, RuntimeOpts};

use super::executor::Executor;

/// Outcome of comparing a replay against the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayVerification {
    /// Outputs are structurally equal
    Match,
    /// Both ran; outputs differ
    Mismatch,
    /// The original execution did not complete
    OriginalFailed,
    /// The replay run errored
    ReplayFailed,
}

/// Result of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Execution that was replayed
    pub execution_id: String,
    /// Output stored on the original record
    pub original_output: Option<serde_json::Value>,
    /// Output produced by the replay run
    pub replay_output: Option<serde_json::Value>,
    /// Comparison outcome
    pub verification: ReplayVerification,
    /// Human-readable diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Metadata-only replayability check.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// Execution that was checked
    pub execution_id: String,
    /// Record status
    pub status: ExecutionStatus,
    /// Whether a component digest was recorded
    pub has_digest: bool,
    /// Whether an output was recorded
    pub has_output: bool,
    /// Whether a meaningful replay is possible
    pub replayable: bool,
}

/// Structural comparison of two completed records.
#[derive(Debug, Clone, Serialize)]
pub struct CompareReport {
    /// First execution
    pub execution_a: String,
    /// Second execution
    pub execution_b: String,
    /// Whether the outputs are structurally equal
    pub outputs_match: bool,
}

impl Executor {
    /// Re-execute a finalized record and compare outputs.
    pub async fn replay(&self, _ctx: &Context, exec_id: &str) -> EngineResult<ReplayReport> {
        let record = self.load_finalized(exec_id).await?;
        let expected_digest = record.component_digest.clone().ok_or_else(|| {
            EngineError::invalid_request(format!(
                "execution {exec_id} has no component digest; nothing to verify against"
            ))
        })?;

        // Digest verification happens in the fetcher: the recorded digest
        // is the pin, a modified binary fails here.
        let fetched = self
            .inner
            .fetcher
            .fetch(&record.reference, Some(&expected_digest))
            .await?;

        let snapshot = record.host_policy_snapshot.clone().unwrap_or_default();
        let timeout_ms = snapshot
            .timeout_ms()?
            .unwrap_or_else(|| self.inner.config.timeout_for(record.component_type));
        let runtime_opts = RuntimeOpts {
            component_type: record.component_type,
            max_memory_bytes: snapshot
                .max_memory_bytes
                .unwrap_or(self.inner.config.max_memory_bytes),
            max_fuel: self.inner.config.max_fuel,
            fuel_yield_interval: self.inner.config.fuel_yield_interval,
            // Replay runs hostless: no HTTP, no secrets, no tools.
            imports: HostImports::default(),
        };

        let input_json = serde_json::to_string(&record.input)
            .map_err(|e| EngineError::encode_error(format!("unserializable input: {e}")))?;
        let replay_result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.inner.runtime.execute(&fetched.bytes, &input_json, runtime_opts),
        )
        .await
        .unwrap_or_else(|_| Err(EngineError::timeout(timeout_ms)));

        let report = match (record.status, replay_result) {
            (ExecutionStatus::Completed, Ok(replay_output)) => {
                let matched = record.output.as_ref() == Some(&replay_output);
                ReplayReport {
                    execution_id: record.id.clone(),
                    original_output: record.output.clone(),
                    replay_output: Some(replay_output),
                    verification: if matched {
                        ReplayVerification::Match
                    } else {
                        ReplayVerification::Mismatch
                    },
                    details: (!matched).then(|| {
                        "outputs differ; note that replays run without host imports".to_string()
                    }),
                }
            }
            (ExecutionStatus::Completed, Err(err)) => ReplayReport {
                execution_id: record.id.clone(),
                original_output: record.output.clone(),
                replay_output: None,
                verification: ReplayVerification::ReplayFailed,
                details: Some(err.to_string()),
            },
            (_, replay_result) => ReplayReport {
                execution_id: record.id.clone(),
                original_output: record.output.clone(),
                replay_output: replay_result.ok(),
                verification: ReplayVerification::OriginalFailed,
                details: Some(format!(
                    "original execution finished as {:?}; nothing to compare",
                    record.status
                )),
            },
        };
        Ok(report)
    }

    /// Metadata-only check: is a meaningful replay possible?
    pub async fn verify(&self, _ctx: &Context, exec_id: &str) -> EngineResult<VerifyReport> {
        let record = self.load_finalized(exec_id).await?;
        let has_digest = record.component_digest.is_some();
        let has_output = record.output.is_some();
        Ok(VerifyReport {
            execution_id: record.id,
            status: record.status,
            has_digest,
            has_output,
            replayable: has_digest && has_output && record.status == ExecutionStatus::Completed,
        })
    }

    /// Structurally compare the outputs of two completed records.
    pub async fn compare(
        &self,
        _ctx: &Context,
        exec_a: &str,
        exec_b: &str,
    ) -> EngineResult<CompareReport> {
        let a = self.load_completed(exec_a).await?;
        let b = self.load_completed(exec_b).await?;
        Ok(CompareReport {
            outputs_match: a.output == b.output,
            execution_a: a.id,
            execution_b: b.id,
        })
    }

    async fn load_finalized(&self, exec_id: &str) -> EngineResult<ExecutionRecord> {
        let record = self
            .inner
            .storage
            .get_execution(exec_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("execution {exec_id}")))?;
        if !record.status.is_terminal() {
            return Err(EngineError::invalid_request(format!(
                "execution {exec_id} is still running; replay requires a finalized record"
            )));
        }
        Ok(record)
    }

    async fn load_completed(&self, exec_id: &str) -> EngineResult<ExecutionRecord> {
        let record = self.load_finalized(exec_id).await?;
        if record.status != ExecutionStatus::Completed {
            return Err(EngineError::invalid_request(format!(
                "execution {exec_id} did not complete; nothing to compare"
            )));
        }
        Ok(record)
    }
}
