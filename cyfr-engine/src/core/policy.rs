//! Policy value type and evaluators.
//!
//! A [`Policy`] is the set of enforceable constraints applied to one
//! component at execution time: domain and method allowlists, rate limit,
//! wall-clock timeout, memory cap, host-body size caps, tool grants, and
//! storage path prefixes.
//!
//! All evaluators are pure functions over the policy value. Policies are
//! administrator-authored and stored by the external metadata store; the
//! engine snapshots the evaluated policy into every execution record.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};

/// Methods a catalyst may use when the policy does not list any explicitly.
///
/// An empty `allowed_methods` list defaults to GET+POST rather than denying
/// everything; a policy that wants to deny all HTTP does so through
/// `allowed_domains`.
pub const DEFAULT_ALLOWED_METHODS: [&str; 2] = ["GET", "POST"];

/// The full set of methods a policy may grant.
pub const KNOWN_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Sliding-window rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests inside one window
    pub requests: u32,
    /// Window length, `N{ms,s,m,h}` (e.g. `"1m"`)
    pub window: String,
}

impl RateLimitConfig {
    /// Window length in milliseconds.
    ///
    /// # Errors
    ///
    /// Fails loudly on a malformed window string; rate limiting must never
    /// silently degrade to unlimited.
    pub fn window_ms(&self) -> EngineResult<u64> {
        parse_duration_ms(&self.window)
    }
}

/// Enforceable constraints for one component.
///
/// Every field is optional from the administrator's point of view; the
/// engine applies type-specific defaults where the policy is silent. The
/// exception is `allowed_domains` for catalysts: a catalyst without a
/// policy, or with an empty domain list, must not execute at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Ordered set of wildcard domain patterns; empty means "deny all HTTP"
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Subset of the known HTTP methods; empty defaults to GET+POST
    #[serde(default)]
    pub allowed_methods: Vec<String>,

    /// Optional sliding-window rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Wall-clock cap, `N{ms,s,m,h}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Linear-memory cap in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<u64>,

    /// Byte cap on host-function request bodies (and execution input)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_size: Option<usize>,

    /// Byte cap on host-function response bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_size: Option<usize>,

    /// Tool grants for formulas, literal or trailing-`*` globs
    /// (e.g. `component.*`, `storage.read`)
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Storage path prefixes a formula may touch (e.g. `agent/`)
    #[serde(default)]
    pub allowed_storage_paths: Vec<String>,
}

impl Policy {
    /// Whether `host` matches the domain allowlist.
    ///
    /// Patterns support a leftmost `*` wildcard: `*.example.com` matches any
    /// subdomain of `example.com` (and `example.com` itself when written as
    /// `*example.com`), `api.example.com` matches exactly, and a bare `*`
    /// matches everything. An empty list matches nothing.
    pub fn allows_domain(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_domains.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_prefix('*') {
                Some(rest) => host.ends_with(rest),
                None => host == pattern,
            }
        })
    }

    /// Whether `method` is allowed, case-insensitively.
    ///
    /// An empty list falls back to [`DEFAULT_ALLOWED_METHODS`].
    pub fn allows_method(&self, method: &str) -> bool {
        let method = method.to_ascii_uppercase();
        if self.allowed_methods.is_empty() {
            return DEFAULT_ALLOWED_METHODS.contains(&method.as_str());
        }
        self.allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&method))
    }

    /// Whether a `namespace.action` tool is granted.
    ///
    /// Grants are literal (`storage.read`) or glob patterns with a trailing
    /// `*` (`component.*`). Deny-by-default: an empty list matches nothing.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|grant| {
            if grant.contains('*') {
                glob::Pattern::new(grant)
                    .map(|p| p.matches(tool))
                    .unwrap_or(false)
            } else {
                grant == tool
            }
        })
    }

    /// Whether `path` starts with one of the allowed storage prefixes.
    pub fn allows_storage_path(&self, path: &str) -> bool {
        self.allowed_storage_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Wall-clock cap in milliseconds, when the policy sets one.
    ///
    /// # Errors
    ///
    /// A malformed duration is a policy-authoring bug and fails loudly
    /// instead of being treated as "no timeout".
    pub fn timeout_ms(&self) -> EngineResult<Option<u64>> {
        self.timeout
            .as_deref()
            .map(parse_duration_ms)
            .transpose()
    }
}

/// Parse a duration string of the form `N{ms,s,m,h}` into milliseconds.
///
/// # Examples
///
/// ```
/// use cyfr_engine::core::policy::parse_duration_ms;
///
/// assert_eq!(parse_duration_ms("250ms").unwrap(), 250);
/// assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
/// assert_eq!(parse_duration_ms("1m").unwrap(), 60_000);
/// assert_eq!(parse_duration_ms("2h").unwrap(), 7_200_000);
/// ```
pub fn parse_duration_ms(input: &str) -> EngineResult<u64> {
    let input = input.trim();
    let (digits, unit) = input.split_at(
        input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len()),
    );

    let value: u64 = digits
        .parse()
        .map_err(|_| EngineError::decode_error(format!("invalid duration '{input}'")))?;

    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => {
            return Err(EngineError::decode_error(format!(
                "invalid duration '{input}': unit must be one of ms, s, m, h"
            )));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| EngineError::decode_error(format!("duration '{input}' overflows")))
}
