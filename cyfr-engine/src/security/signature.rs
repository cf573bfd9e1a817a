//! Artifact signature verification seam.
//!
//! Real verification infrastructure lives outside the engine; the contract
//! here is only that a verifier answers ok-or-error for one reference and
//! its fetched bytes. [`StaticVerifier`] is the current implementation:
//! local and arca references pass, registry and OCI references pass unless
//! `enforce_signatures` is on, in which case they are refused until a real
//! verifier is wired in.

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::reference::{ComponentRef, Reference};

/// Answers whether a fetched artifact is acceptably signed.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `binary` for `reference`.
    ///
    /// # Errors
    ///
    /// `signature_invalid` when the artifact must not run.
    fn verify(
        &self,
        reference: &Reference,
        component_ref: &ComponentRef,
        binary: &[u8],
    ) -> EngineResult<()>;
}

/// Stub verifier with an enforcement switch.
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    /// Refuse unsigned registry/OCI artifacts
    pub enforce_signatures: bool,
}

impl StaticVerifier {
    /// Create a verifier with the given enforcement setting.
    pub fn new(enforce_signatures: bool) -> Self {
        Self { enforce_signatures }
    }
}

impl SignatureVerifier for StaticVerifier {
    fn verify(
        &self,
        reference: &Reference,
        component_ref: &ComponentRef,
        _binary: &[u8],
    ) -> EngineResult<()> {
        match reference {
            Reference::Local(_) | Reference::Arca(_) => Ok(()),
            Reference::Registry(_) | Reference::Oci(_) => {
                if self.enforce_signatures {
                    Err(EngineError::signature_invalid(
                        component_ref.to_string(),
                        "signature enforcement is on and no verifier is configured",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}
