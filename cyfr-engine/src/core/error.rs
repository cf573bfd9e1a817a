//! Structured error types for the execution engine.
//!
//! This module defines the error handling strategy for the entire crate.
//! Every failure mode the engine can surface is a variant of [`EngineError`],
//! grouped by kind: validation, policy, security, resource, external, and
//! internal failures.
//!
//! # Error Philosophy
//!
//! - **Structured Errors**: all errors use structured variants with context
//! - **Single-Line Messages**: user-visible messages identify the violated
//!   rule (domain, method, rate, ...) without stack traces
//! - **Source Chaining**: errors carry source errors for debugging
//! - **Wire Mapping**: [`EngineError::kind`] yields the stable snake_case
//!   identifier used in the `{error: {type, message}}` host-function encoding
//!
//! # Examples
//!
//! ```
//! use cyfr_engine::core::error::EngineError;
//!
//! let err = EngineError::domain_blocked("evil.com");
//! assert_eq!(err.kind(), "domain_blocked");
//! assert!(err.to_string().contains("evil.com"));
//! ```

// Layer 1: Standard library imports
use std::io;

// Layer 2: Third-party crate imports
use thiserror::Error;

/// Error type covering every failure mode of the execution engine.
///
/// Variants are grouped by kind. The [`kind`](EngineError::kind) method maps
/// each variant to the stable identifier used on the host-function wire and
/// in execution records, so adding a variant means adding a kind mapping.
#[derive(Error, Debug)]
pub enum EngineError {
    // === Validation ===
    /// Component type is not one of catalyst, reagent, formula.
    #[error("Unknown component type: {type_str}")]
    UnknownComponentType {
        /// The rejected type token
        type_str: String,
    },

    /// Reference string did not parse.
    #[error("Malformed component reference '{reference}': {reason}")]
    MalformedReference {
        /// The rejected reference text
        reference: String,
        /// Why parsing failed
        reason: String,
    },

    /// Request that is well-formed but invalid in the current state
    /// (e.g. replaying a record that is still running).
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// Why the request cannot be served
        reason: String,
    },

    /// Reference kind the engine cannot resolve yet.
    #[error("Unsupported reference: {reason}")]
    UnsupportedReference {
        /// What is unsupported and what to use instead
        reason: String,
    },

    // === Policy ===
    /// Catalyst executed without any policy configured.
    #[error("No policy configured for {component_ref}; catalysts require a policy before execution")]
    PolicyMissing {
        /// Canonical component reference
        component_ref: String,
    },

    /// Catalyst policy has an empty domain allowlist.
    #[error("Policy for {component_ref} allows no domains; add allowed_domains before execution")]
    NoAllowedDomains {
        /// Canonical component reference
        component_ref: String,
    },

    /// Requested host is not in the policy's domain allowlist.
    #[error("Domain not allowed by policy: {host}")]
    DomainBlocked {
        /// Host that was refused
        host: String,
    },

    /// HTTP method is not in the policy's method allowlist.
    #[error("HTTP method not allowed by policy: {method}")]
    MethodBlocked {
        /// Method that was refused
        method: String,
    },

    /// Tool action does not match any allowed_tools pattern.
    #[error("Tool not allowed by policy: {tool}")]
    ToolDenied {
        /// `namespace.action` that was refused
        tool: String,
    },

    /// Storage path falls outside the allowed prefixes.
    #[error("Storage path not allowed by policy: {path}")]
    StoragePathDenied {
        /// Path that was refused
        path: String,
    },

    /// Sliding-window rate limit exhausted.
    #[error("Rate limit exceeded. Retry in {}s", retry_after_ms.div_ceil(1000))]
    RateLimited {
        /// Milliseconds until the oldest entry leaves the window
        retry_after_ms: u64,
    },

    /// Host-function request body exceeds the policy cap.
    #[error("Request size {size} exceeds maximum {max} bytes")]
    RequestTooLarge {
        /// Observed size in bytes
        size: usize,
        /// Policy cap in bytes
        max: usize,
    },

    /// Host-function response body exceeds the policy cap.
    #[error("Response size exceeds maximum {max} bytes")]
    ResponseTooLarge {
        /// Policy cap in bytes
        max: usize,
    },

    // === Security ===
    /// Hostname resolved to a private or internal IP address.
    #[error("Refusing request to private or internal address: {detail}")]
    PrivateIpBlocked {
        /// Offending host/IP description
        detail: String,
    },

    /// Artifact signature did not verify.
    #[error("Signature verification failed for {component_ref}: {reason}")]
    SignatureInvalid {
        /// Canonical component reference
        component_ref: String,
        /// Verifier diagnostic
        reason: String,
    },

    /// Binary bytes do not hash to the expected digest.
    #[error("Component digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Digest recorded earlier (`sha256:<hex>`)
        expected: String,
        /// Digest computed from the fetched bytes
        computed: String,
    },

    /// Secret or resource access denied.
    #[error("access-denied: {reason}")]
    AccessDenied {
        /// What was denied and why
        reason: String,
    },

    // === Resource ===
    /// Wall-clock deadline expired.
    #[error("Execution timeout after {elapsed_ms}ms")]
    Timeout {
        /// Deadline that expired, in milliseconds
        elapsed_ms: u64,
    },

    /// Linear memory cap was hit during execution.
    #[error("Memory limit exceeded: {limit_bytes} bytes")]
    MemoryExceeded {
        /// Configured cap in bytes
        limit_bytes: u64,
    },

    /// Instruction budget was exhausted.
    #[error("Fuel exhausted after {limit} units")]
    FuelExhausted {
        /// Configured fuel budget
        limit: u64,
    },

    /// Too many concurrent streams for one execution.
    #[error("Stream limit reached: at most {max} concurrent streams per execution")]
    StreamLimit {
        /// Configured concurrent-stream cap
        max: usize,
    },

    /// Formula sub-invocation recursion cap reached.
    #[error("Formula invocation depth exceeded (max {max})")]
    DepthExceeded {
        /// Configured depth cap
        max: u32,
    },

    /// User-initiated cancellation terminated the run.
    #[error("Execution cancelled")]
    Cancelled,

    // === External ===
    /// Hostname did not resolve.
    #[error("DNS resolution failed for {host}: {reason}")]
    DnsError {
        /// Host that failed to resolve
        host: String,
        /// Resolver diagnostic
        reason: String,
    },

    /// Transport-level HTTP failure (connect, TLS, timeout, ...).
    #[error("HTTP request failed: {reason}")]
    HttpError {
        /// Transport diagnostic
        reason: String,
        /// Optional source error for debugging
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record, policy, binary, or secret was not found.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing entity
        what: String,
    },

    /// Storage collaborator failure.
    #[error("Storage error: {reason}")]
    StorageError {
        /// Reason for the storage failure
        reason: String,
        /// Optional source error for debugging
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // === Internal ===
    /// Payload failed to decode (JSON, base64, UTF-8).
    #[error("Decode error: {reason}")]
    DecodeError {
        /// Reason for the decode failure
        reason: String,
    },

    /// Payload failed to encode.
    #[error("Encode error: {reason}")]
    EncodeError {
        /// Reason for the encode failure
        reason: String,
    },

    /// I/O failure while fetching or reading binaries.
    #[error("I/O error: {operation}")]
    IoError {
        /// Operation that failed
        operation: String,
        /// Source I/O error
        #[source]
        source: io::Error,
    },

    /// Unexpected failure; indicates a bug in the engine.
    #[error("Internal error: {reason}")]
    Unexpected {
        /// Reason for the internal error
        reason: String,
        /// Optional source error for debugging
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable snake_case identifier for this error, used as the `type` field
    /// of the `{error: {type, message}}` host-function encoding and in
    /// failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownComponentType { .. } => "unknown_component_type",
            Self::MalformedReference { .. } => "malformed_reference",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedReference { .. } => "unsupported_reference",
            Self::PolicyMissing { .. } => "policy_missing",
            Self::NoAllowedDomains { .. } => "no_allowed_domains",
            Self::DomainBlocked { .. } => "domain_blocked",
            Self::MethodBlocked { .. } => "method_blocked",
            Self::ToolDenied { .. } => "tool_denied",
            Self::StoragePathDenied { .. } => "storage_path_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::PrivateIpBlocked { .. } => "private_ip_blocked",
            Self::SignatureInvalid { .. } => "signature_invalid",
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::AccessDenied { .. } => "access_denied",
            Self::Timeout { .. } => "timeout",
            Self::MemoryExceeded { .. } => "memory_exceeded",
            Self::FuelExhausted { .. } => "fuel_exhausted",
            Self::StreamLimit { .. } => "stream_limit",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::Cancelled => "cancelled",
            Self::DnsError { .. } => "dns_error",
            Self::HttpError { .. } => "http_error",
            Self::NotFound { .. } => "not_found",
            Self::StorageError { .. } => "storage_error",
            Self::DecodeError { .. } => "decode_error",
            Self::EncodeError { .. } => "encode_error",
            Self::IoError { .. } => "io_error",
            Self::Unexpected { .. } => "unexpected",
        }
    }

    /// Create an unknown component type error.
    pub fn unknown_component_type(type_str: impl Into<String>) -> Self {
        Self::UnknownComponentType {
            type_str: type_str.into(),
        }
    }

    /// Create a malformed reference error.
    pub fn malformed_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create an unsupported reference error.
    pub fn unsupported_reference(reason: impl Into<String>) -> Self {
        Self::UnsupportedReference {
            reason: reason.into(),
        }
    }

    /// Create a policy missing error.
    pub fn policy_missing(component_ref: impl Into<String>) -> Self {
        Self::PolicyMissing {
            component_ref: component_ref.into(),
        }
    }

    /// Create a no-allowed-domains error.
    pub fn no_allowed_domains(component_ref: impl Into<String>) -> Self {
        Self::NoAllowedDomains {
            component_ref: component_ref.into(),
        }
    }

    /// Create a domain blocked error.
    pub fn domain_blocked(host: impl Into<String>) -> Self {
        Self::DomainBlocked { host: host.into() }
    }

    /// Create a method blocked error.
    pub fn method_blocked(method: impl Into<String>) -> Self {
        Self::MethodBlocked {
            method: method.into(),
        }
    }

    /// Create a tool denied error.
    pub fn tool_denied(tool: impl Into<String>) -> Self {
        Self::ToolDenied { tool: tool.into() }
    }

    /// Create a storage path denied error.
    pub fn storage_path_denied(path: impl Into<String>) -> Self {
        Self::StoragePathDenied { path: path.into() }
    }

    /// Create a rate limited error. `retry_after_ms` is clamped to zero by
    /// callers; the message rounds up to whole seconds.
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::RateLimited { retry_after_ms }
    }

    /// Create a request too large error.
    pub fn request_too_large(size: usize, max: usize) -> Self {
        Self::RequestTooLarge { size, max }
    }

    /// Create a response too large error.
    pub fn response_too_large(max: usize) -> Self {
        Self::ResponseTooLarge { max }
    }

    /// Create a private IP blocked error.
    pub fn private_ip_blocked(detail: impl Into<String>) -> Self {
        Self::PrivateIpBlocked {
            detail: detail.into(),
        }
    }

    /// Create a signature invalid error.
    pub fn signature_invalid(component_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            component_ref: component_ref.into(),
            reason: reason.into(),
        }
    }

    /// Create a digest mismatch error.
    pub fn digest_mismatch(expected: impl Into<String>, computed: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            computed: computed.into(),
        }
    }

    /// Create an access denied error.
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    /// Create a memory exceeded error.
    pub fn memory_exceeded(limit_bytes: u64) -> Self {
        Self::MemoryExceeded { limit_bytes }
    }

    /// Create a fuel exhausted error.
    pub fn fuel_exhausted(limit: u64) -> Self {
        Self::FuelExhausted { limit }
    }

    /// Create a stream limit error.
    pub fn stream_limit(max: usize) -> Self {
        Self::StreamLimit { max }
    }

    /// Create a depth exceeded error.
    pub fn depth_exceeded(max: u32) -> Self {
        Self::DepthExceeded { max }
    }

    /// Create a DNS error.
    pub fn dns_error(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DnsError {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create an HTTP transport error.
    pub fn http_error(reason: impl Into<String>) -> Self {
        Self::HttpError {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create an HTTP transport error with source.
    pub fn http_error_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::HttpError {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a storage error.
    pub fn storage_error(reason: impl Into<String>) -> Self {
        Self::StorageError {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a storage error with source.
    pub fn storage_error_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StorageError {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decode error.
    pub fn decode_error(reason: impl Into<String>) -> Self {
        Self::DecodeError {
            reason: reason.into(),
        }
    }

    /// Create an encode error.
    pub fn encode_error(reason: impl Into<String>) -> Self {
        Self::EncodeError {
            reason: reason.into(),
        }
    }

    /// Create an I/O error.
    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error.
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::Unexpected {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn unexpected_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unexpected {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }
}
