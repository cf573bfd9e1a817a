//! Caller identity issued by the authentication subsystem.

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

/// Identity and scoping for one caller.
///
/// Issued by the external auth collaborator (JWT parsing, session handling
/// and revocation live there); the engine only consumes it for scoping
/// rate-limit keys, secret grants, and audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Stable user identifier
    pub user_id: String,
    /// Organization the user acts within
    pub org_id: String,
    /// Session the request arrived on, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Context {
    /// Construct a context for `user_id` within `org_id`.
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            session_id: None,
        }
    }

    /// Attach the originating session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
