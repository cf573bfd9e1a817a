//! Telemetry surface.
//!
//! The engine emits a small, uniform set of events covering execution
//! lifecycle, secret access, mediated HTTP, formula sub-invocation, and
//! mediated tool calls. Events flow through the [`TelemetrySink`] trait so
//! backends can plug in; the default sink forwards to `tracing`.
//!
//! Secret *values* never appear in telemetry, only secret names.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use tracing::info;

// Layer 3: Internal module imports
use crate::core::reference::ComponentType;

/// One telemetry event.
///
/// Event names are stable: dashboards and alerting key on them.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// `execute.start`: pre-flight passed, the run is beginning
    ExecuteStart {
        /// Execution record id
        exec_id: String,
        /// Canonical component reference
        component: String,
        /// Component type
        component_type: ComponentType,
        /// User the execution runs as
        user_id: String,
    },
    /// `execute.stop`: the run completed successfully
    ExecuteStop {
        /// Execution record id
        exec_id: String,
        /// Canonical component reference
        component: String,
        /// Component type
        component_type: ComponentType,
        /// User the execution ran as
        user_id: String,
        /// Wall-clock duration in nanoseconds
        duration_ns: u64,
        /// Peak linear-memory estimate in bytes
        memory_bytes: u64,
    },
    /// `execute.exception`: the run failed
    ExecuteException {
        /// Execution record id
        exec_id: String,
        /// Canonical component reference
        component: String,
        /// Component type
        component_type: ComponentType,
        /// User the execution ran as
        user_id: String,
        /// Wall-clock duration in nanoseconds
        duration_ns: u64,
        /// Single-line failure message
        error: String,
    },
    /// `secret.accessed`: a granted secret was read
    SecretAccessed {
        /// Secret name (never the value)
        secret_name: String,
        /// Canonical component reference
        component_ref: String,
    },
    /// `secret.denied`: an ungranted secret was requested
    SecretDenied {
        /// Secret name (never the value)
        secret_name: String,
        /// Canonical component reference
        component_ref: String,
    },
    /// `http.request`: one mediated HTTP request finished
    HttpRequest {
        /// Canonical component reference
        component_ref: String,
        /// HTTP method
        method: String,
        /// Target host
        host: String,
        /// Response status, absent on transport failure
        status: Option<u16>,
        /// Request duration in milliseconds
        duration_ms: u64,
    },
    /// `formula.invoke`: a formula invoked a child component
    FormulaInvoke {
        /// Parent execution id
        parent_id: String,
        /// Child execution id, when one was created
        child_id: Option<String>,
        /// Canonical reference of the invoked component
        reference: String,
        /// `completed` or `failed`
        status: String,
    },
    /// `mcp_tool.call`: a mediated tool call finished
    McpToolCall {
        /// Execution id of the calling formula
        exec_id: String,
        /// `namespace.action`
        tool_action: String,
        /// `completed`, `denied`, or `failed`
        status: String,
        /// Call duration in milliseconds
        duration_ms: u64,
    },
}

impl TelemetryEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecuteStart { .. } => "execute.start",
            Self::ExecuteStop { .. } => "execute.stop",
            Self::ExecuteException { .. } => "execute.exception",
            Self::SecretAccessed { .. } => "secret.accessed",
            Self::SecretDenied { .. } => "secret.denied",
            Self::HttpRequest { .. } => "http.request",
            Self::FormulaInvoke { .. } => "formula.invoke",
            Self::McpToolCall { .. } => "mcp_tool.call",
        }
    }
}

/// Pluggable telemetry backend.
pub trait TelemetrySink: Send + Sync {
    /// Emit one event. Must not block for long and must not fail.
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink: structured `tracing` events under the
/// `cyfr_engine::telemetry` target.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ExecuteStart {
                exec_id,
                component,
                component_type,
                user_id,
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), exec_id, component, component_type = %component_type, user_id
            ),
            TelemetryEvent::ExecuteStop {
                exec_id,
                component,
                duration_ns,
                memory_bytes,
                ..
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), exec_id, component, duration_ns, memory_bytes,
                outcome = "success"
            ),
            TelemetryEvent::ExecuteException {
                exec_id,
                component,
                duration_ns,
                error,
                ..
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), exec_id, component, duration_ns, error,
                outcome = "failure"
            ),
            TelemetryEvent::SecretAccessed {
                secret_name,
                component_ref,
            }
            | TelemetryEvent::SecretDenied {
                secret_name,
                component_ref,
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), secret_name, component_ref
            ),
            TelemetryEvent::HttpRequest {
                component_ref,
                method,
                host,
                status,
                duration_ms,
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), component_ref, method, host, status = ?status, duration_ms
            ),
            TelemetryEvent::FormulaInvoke {
                parent_id,
                child_id,
                reference,
                status,
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), parent_id, child_id = ?child_id, reference, status
            ),
            TelemetryEvent::McpToolCall {
                exec_id,
                tool_action,
                status,
                duration_ms,
            } => info!(
                target: "cyfr_engine::telemetry",
                event = event.name(), exec_id, tool_action, status, duration_ms
            ),
        }
    }
}

/// Test sink that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder, shareable as a sink.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Names of everything emitted so far.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(TelemetryEvent::name).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
