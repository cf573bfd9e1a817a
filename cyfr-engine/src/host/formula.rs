//! Formula sub-invocation host function (`formula/invoke`), formula-only.
//!
//! A formula composes other components by calling back into the engine.
//! The call blocks the WASM guest until the child execution completes
//! (WASM is single-threaded), shares the parent's `request_id` for
//! correlation, and records `parent_execution_id` for lineage. A depth cap
//! stops malicious recursion; the component graph is a DAG at runtime
//! because the parent always waits for its child.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::core::context::Context;
use crate::core::error::{EngineError, EngineResult};
use crate::core::record::ExecutionResult;
use crate::core::reference::{ComponentRef, ComponentType, Reference};
use crate::core::telemetry::{TelemetryEvent, TelemetrySink};
use crate::host::protocol::{self, FormulaCallRequest};

/// Lineage and correlation for a sub-invocation.
#[derive(Debug, Clone)]
pub struct ParentInfo {
    /// Execution id of the calling formula
    pub execution_id: String,
    /// Correlation id shared across the whole invocation tree
    pub request_id: String,
    /// Depth of the caller (root executions are depth 0)
    pub depth: u32,
}

/// The engine surface a formula host calls back into.
///
/// Implemented by the executor; a trait seam here keeps the host layer
/// from depending on the orchestration layer.
#[async_trait]
pub trait FormulaInvoker: Send + Sync {
    /// Run a child execution to completion.
    async fn invoke_child(
        &self,
        ctx: &Context,
        reference: Reference,
        input: serde_json::Value,
        parent: ParentInfo,
    ) -> EngineResult<ExecutionResult>;
}

/// Per-execution formula host.
pub struct FormulaHost {
    ctx: Context,
    parent: ParentInfo,
    max_depth: u32,
    invoker: Arc<dyn FormulaInvoker>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl FormulaHost {
    /// Build the host for one formula execution.
    pub fn new(
        ctx: Context,
        parent: ParentInfo,
        max_depth: u32,
        invoker: Arc<dyn FormulaInvoker>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            ctx,
            parent,
            max_depth,
            invoker,
            telemetry,
        }
    }

    /// Handle one `formula/invoke.call` payload. Never raises.
    pub async fn call(&self, payload: &str) -> String {
        let request = match protocol::parse_payload::<FormulaCallRequest>(payload) {
            Ok(request) => request,
            Err(err) => return protocol::encode_error(&err),
        };

        let reference_str = request.reference.clone();
        let result = self.call_inner(request).await;

        let (child_id, status) = match &result {
            Ok(result) => (Some(result.execution_id.clone()), "completed"),
            Err(_) => (None, "failed"),
        };
        self.telemetry.emit(TelemetryEvent::FormulaInvoke {
            parent_id: self.parent.execution_id.clone(),
            child_id,
            reference: reference_str,
            status: status.to_string(),
        });

        match result {
            Ok(result) => protocol::encode_ok(&serde_json::json!({
                "status": "completed",
                "execution_id": result.execution_id,
                "output": result.output,
            })),
            Err(err) => protocol::encode_error(&err),
        }
    }

    async fn call_inner(&self, request: FormulaCallRequest) -> EngineResult<ExecutionResult> {
        if self.parent.depth + 1 >= self.max_depth {
            return Err(EngineError::depth_exceeded(self.max_depth));
        }

        let component_ref = ComponentRef::parse(&request.reference)?;
        if let Some(expected) = request.component_type.as_deref() {
            let expected = ComponentType::parse(expected)?;
            if expected != component_ref.component_type {
                return Err(EngineError::malformed_reference(
                    &request.reference,
                    format!(
                        "type mismatch: reference is a {}, caller expected a {expected}",
                        component_ref.component_type
                    ),
                ));
            }
        }

        let child = ParentInfo {
            execution_id: self.parent.execution_id.clone(),
            request_id: self.parent.request_id.clone(),
            depth: self.parent.depth + 1,
        };
        self.invoker
            .invoke_child(
                &self.ctx,
                Reference::Registry(component_ref.to_string()),
                request.input,
                child,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::core::telemetry::RecordingTelemetry;

    struct MockInvoker {
        calls: Mutex<Vec<(String, serde_json::Value, ParentInfo)>>,
    }

    impl MockInvoker {
        fn shared() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FormulaInvoker for MockInvoker {
        async fn invoke_child(
            &self,
            _ctx: &Context,
            reference: Reference,
            input: serde_json::Value,
            parent: ParentInfo,
        ) -> EngineResult<ExecutionResult> {
            self.calls
                .lock()
                .push((reference.to_string(), input, parent));
            Ok(ExecutionResult {
                execution_id: "exec_child".to_string(),
                output: json!({"result": 8}),
                component_digest: Some("sha256:abc".to_string()),
                duration_ms: 5,
                host_policy_snapshot: None,
            })
        }
    }

    fn parent() -> ParentInfo {
        ParentInfo {
            execution_id: "exec_parent".to_string(),
            request_id: "req-1".to_string(),
            depth: 0,
        }
    }

    fn host(invoker: Arc<MockInvoker>, telemetry: Arc<RecordingTelemetry>) -> FormulaHost {
        FormulaHost::new(Context::new("user-1", "org-1"), parent(), 8, invoker, telemetry)
    }

    fn error_type(response: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(response).unwrap();
        value["error"]["type"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_invoke_propagates_lineage_and_correlation() {
        let invoker = MockInvoker::shared();
        let host = host(invoker.clone(), RecordingTelemetry::shared());

        let response = host
            .call(r#"{"reference": "reagent:local.sum:1.0.0", "input": {"a": 5, "b": 3}}"#)
            .await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["output"]["result"], 8);

        let calls = invoker.calls.lock();
        let (reference, input, child) = &calls[0];
        assert_eq!(reference, "registry:reagent:local.sum:1.0.0");
        assert_eq!(input["a"], 5);
        assert_eq!(child.execution_id, "exec_parent");
        assert_eq!(child.request_id, "req-1");
        assert_eq!(child.depth, 1);
    }

    #[tokio::test]
    async fn test_depth_cap() {
        let invoker = MockInvoker::shared();
        let deep_parent = ParentInfo {
            depth: 7,
            ..parent()
        };
        let host = FormulaHost::new(
            Context::new("user-1", "org-1"),
            deep_parent,
            8,
            invoker.clone(),
            RecordingTelemetry::shared(),
        );

        let response = host
            .call(r#"{"reference": "formula:local.loop:1.0.0"}"#)
            .await;
        assert_eq!(error_type(&response), "depth_exceeded");
        assert!(invoker.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_rejected() {
        let host = host(MockInvoker::shared(), RecordingTelemetry::shared());
        let response = host
            .call(r#"{"reference": "reagent:local.sum:1.0.0", "type": "catalyst"}"#)
            .await;
        assert_eq!(error_type(&response), "malformed_reference");
    }

    #[tokio::test]
    async fn test_telemetry_reports_child() {
        let telemetry = RecordingTelemetry::shared();
        let host = host(MockInvoker::shared(), telemetry.clone());
        let _ = host
            .call(r#"{"reference": "reagent:local.sum:1.0.0"}"#)
            .await;

        match &telemetry.events()[0] {
            TelemetryEvent::FormulaInvoke {
                parent_id,
                child_id,
                status,
                ..
            } => {
                assert_eq!(parent_id, "exec_parent");
                assert_eq!(child_id.as_deref(), Some("exec_child"));
                assert_eq!(status, "completed");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
