//! Mediated tool host function (`mcp/tools`), formula-only.
//!
//! Dispatches `{tool, action, args}` calls to registered tool namespaces
//! (`component`, `storage`, `policy`, `build`, `secret`, `execution`,
//! `audit`, `config`). Gating is deny-by-default:
//!
//! 1. `namespace.action` must match the policy's `allowed_tools` grants.
//! 2. `storage` writes are confined to the `agent/` namespace, and both
//!    reads and writes must satisfy `allowed_storage_paths`.
//!
//! Handlers are supplied by the front-end; the engine only mediates.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::policy::Policy;
use crate::core::telemetry::{TelemetryEvent, TelemetrySink};
use crate::host::protocol::{self, McpCallRequest};

/// Storage paths a formula may write under.
const AGENT_WRITE_PREFIX: &str = "agent/";

/// One tool namespace's implementation.
#[async_trait]
pub trait McpToolHandler: Send + Sync {
    /// Namespace this handler serves (`storage`, `component`, ...).
    fn namespace(&self) -> &str;

    /// Execute one action.
    async fn call(&self, action: &str, args: serde_json::Value) -> EngineResult<serde_json::Value>;
}

/// Registry of tool handlers, shared across executions.
#[derive(Default)]
pub struct McpToolRegistry {
    handlers: HashMap<String, Arc<dyn McpToolHandler>>,
}

impl McpToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its namespace.
    pub fn register(&mut self, handler: Arc<dyn McpToolHandler>) {
        self.handlers.insert(handler.namespace().to_string(), handler);
    }

    fn get(&self, namespace: &str) -> Option<&Arc<dyn McpToolHandler>> {
        self.handlers.get(namespace)
    }
}

/// Per-execution tool host.
pub struct McpHost {
    exec_id: String,
    policy: Policy,
    registry: Arc<McpToolRegistry>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl McpHost {
    /// Build the host for one execution.
    pub fn new(
        exec_id: impl Into<String>,
        policy: Policy,
        registry: Arc<McpToolRegistry>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            exec_id: exec_id.into(),
            policy,
            registry,
            telemetry,
        }
    }

    /// Handle one `mcp/tools.call` payload. Never raises.
    pub async fn call(&self, payload: &str) -> String {
        let request = match protocol::parse_payload::<McpCallRequest>(payload) {
            Ok(request) => request,
            Err(err) => return protocol::encode_error(&err),
        };

        let started = Instant::now();
        let action_id = request.action_id();
        let result = self.call_inner(&request).await;
        let status = match &result {
            Ok(_) => "completed",
            Err(err) if err.kind() == "tool_denied" || err.kind() == "storage_path_denied" => {
                "denied"
            }
            Err(_) => "failed",
        };
        self.telemetry.emit(TelemetryEvent::McpToolCall {
            exec_id: self.exec_id.clone(),
            tool_action: action_id,
            status: status.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        match result {
            Ok(value) => protocol::encode_ok(&serde_json::json!({
                "status": "completed",
                "result": value,
            })),
            Err(err) => protocol::encode_error(&err),
        }
    }

    async fn call_inner(&self, request: &McpCallRequest) -> EngineResult<serde_json::Value> {
        let action_id = request.action_id();
        if !self.policy.allows_tool(&action_id) {
            return Err(EngineError::tool_denied(action_id));
        }

        if request.tool == "storage" {
            self.check_storage_path(request)?;
        }

        let handler = self
            .registry
            .get(&request.tool)
            .ok_or_else(|| EngineError::not_found(format!("tool namespace '{}'", request.tool)))?;
        handler.call(&request.action, request.args.clone()).await
    }

    fn check_storage_path(&self, request: &McpCallRequest) -> EngineResult<()> {
        let path = request
            .args
            .get("path")
            .and_then(|p| p.as_str())
            .ok_or_else(|| EngineError::decode_error("storage call requires a string 'path'"))?;

        if request.action == "write" && !path.starts_with(AGENT_WRITE_PREFIX) {
            return Err(EngineError::storage_path_denied(path));
        }
        if matches!(request.action.as_str(), "read" | "write")
            && !self.policy.allows_storage_path(path)
        {
            return Err(EngineError::storage_path_denied(path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use serde_json::json;

    use super::*;
    use crate::core::telemetry::RecordingTelemetry;

    struct EchoStorage;

    #[async_trait]
    impl McpToolHandler for EchoStorage {
        fn namespace(&self) -> &str {
            "storage"
        }

        async fn call(
            &self,
            action: &str,
            args: serde_json::Value,
        ) -> EngineResult<serde_json::Value> {
            Ok(json!({"action": action, "args": args}))
        }
    }

    fn host_with_policy(policy: Policy) -> (McpHost, Arc<RecordingTelemetry>) {
        let mut registry = McpToolRegistry::new();
        registry.register(Arc::new(EchoStorage));
        let telemetry = RecordingTelemetry::shared();
        let host = McpHost::new("exec_test", policy, Arc::new(registry), telemetry.clone());
        (host, telemetry)
    }

    fn storage_policy() -> Policy {
        Policy {
            allowed_tools: vec!["storage.*".to_string()],
            allowed_storage_paths: vec!["agent/".to_string()],
            ..Policy::default()
        }
    }

    fn error_type(response: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(response).unwrap();
        value["error"]["type"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_tool_denied_by_default() {
        let (host, telemetry) = host_with_policy(Policy::default());
        let response = host
            .call(r#"{"tool": "storage", "action": "read", "args": {"path": "agent/x"}}"#)
            .await;
        assert_eq!(error_type(&response), "tool_denied");

        match &telemetry.events()[0] {
            TelemetryEvent::McpToolCall { status, tool_action, .. } => {
                assert_eq!(status, "denied");
                assert_eq!(tool_action, "storage.read");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_granted_tool_dispatches() {
        let (host, telemetry) = host_with_policy(storage_policy());
        let response = host
            .call(r#"{"tool": "storage", "action": "read", "args": {"path": "agent/memo"}}"#)
            .await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["result"]["action"], "read");

        match &telemetry.events()[0] {
            TelemetryEvent::McpToolCall { status, .. } => assert_eq!(status, "completed"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_storage_write_outside_agent_prefix_denied() {
        let (host, _) = host_with_policy(Policy {
            allowed_storage_paths: vec!["system/".to_string(), "agent/".to_string()],
            allowed_tools: vec!["storage.*".to_string()],
            ..Policy::default()
        });
        let response = host
            .call(r#"{"tool": "storage", "action": "write", "args": {"path": "system/config"}}"#)
            .await;
        assert_eq!(error_type(&response), "storage_path_denied");
    }

    #[tokio::test]
    async fn test_storage_read_outside_allowed_paths_denied() {
        let (host, _) = host_with_policy(storage_policy());
        let response = host
            .call(r#"{"tool": "storage", "action": "read", "args": {"path": "other/file"}}"#)
            .await;
        assert_eq!(error_type(&response), "storage_path_denied");
    }

    #[tokio::test]
    async fn test_unknown_namespace_not_found() {
        let (host, _) = host_with_policy(Policy {
            allowed_tools: vec!["build.*".to_string()],
            ..Policy::default()
        });
        let response = host
            .call(r#"{"tool": "build", "action": "start", "args": {}}"#)
            .await;
        assert_eq!(error_type(&response), "not_found");
    }

    #[tokio::test]
    async fn test_glob_grant_matches_namespace() {
        let (host, _) = host_with_policy(storage_policy());
        let response = host
            .call(r#"{"tool": "storage", "action": "write", "args": {"path": "agent/memo"}}"#)
            .await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], "completed");
    }
}
