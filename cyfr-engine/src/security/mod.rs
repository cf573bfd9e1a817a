//! # Security Module
//!
//! Enforcement services applied around every execution: the read-through
//! policy cache, the sliding-window rate limiter, secret resolution and
//! output masking, SSRF checks, and the signature-verification seam.
//!
//! Imports only from `core/`.

pub mod masker;
pub mod policy_cache;
pub mod rate_limiter;
pub mod secrets;
pub mod signature;
pub mod ssrf;

pub use masker::{mask_output, mask_values, MIN_MASK_LEN, REDACTION_TOKEN};
pub use policy_cache::PolicyCache;
pub use rate_limiter::{RateDecision, RateLimiter};
pub use secrets::{ResolvedSecrets, SecretResolver};
pub use signature::{SignatureVerifier, StaticVerifier};
pub use ssrf::{ensure_public_host, is_private_ip};
