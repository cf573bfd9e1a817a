//! Secrets host function (`secrets/read`), catalyst-only.
//!
//! Reads are answered from the map resolved before the runtime started;
//! the store is never consulted mid-execution. A denied read returns the
//! literal `access-denied: ...` string to the guest (this host's ABI is a
//! plain string, not the JSON error envelope) and emits `secret.denied`.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 3: Internal module imports
use crate::core::reference::ComponentRef;
use crate::core::telemetry::{TelemetryEvent, TelemetrySink};
use crate::security::secrets::ResolvedSecrets;

/// Per-execution secrets host.
pub struct SecretsHost {
    component_ref: ComponentRef,
    secrets: ResolvedSecrets,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SecretsHost {
    /// Build the host over an execution's pre-resolved secrets.
    pub fn new(
        component_ref: ComponentRef,
        secrets: ResolvedSecrets,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            component_ref,
            secrets,
            telemetry,
        }
    }

    /// Handle one `secrets/read.get` call.
    pub fn get(&self, name: &str) -> String {
        match self.secrets.get(name) {
            Some(value) => {
                self.telemetry.emit(TelemetryEvent::SecretAccessed {
                    secret_name: name.to_string(),
                    component_ref: self.component_ref.to_string(),
                });
                value.to_string()
            }
            None => {
                self.telemetry.emit(TelemetryEvent::SecretDenied {
                    secret_name: name.to_string(),
                    component_ref: self.component_ref.to_string(),
                });
                format!("access-denied: {name} not granted to {}", self.component_ref)
            }
        }
    }
}
