//! Sliding-window rate limiting per `(user, component)`.
//!
//! # Algorithm
//!
//! Each key holds a bounded list of recent request timestamps:
//!
//! 1. No rate limit configured → allow, unlimited.
//! 2. Drop timestamps older than `now − window`.
//! 3. At or over the limit → deny with `retry_after = oldest + window − now`
//!    (clamped to zero).
//! 4. Otherwise append `now` and persist with TTL `2 × window`.
//!
//! The check-and-append is atomic per key: the dashmap entry lock gives
//! single-writer discipline per `(user, component)` pair. Ordering between
//! different keys is irrelevant.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::core::error::EngineResult;
use crate::core::policy::Policy;
use crate::core::reference::ComponentRef;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// No rate limit configured for this policy
    Unlimited,
    /// Allowed; `remaining` requests left in the current window
    Allowed {
        /// Requests left before the window saturates
        remaining: u32,
    },
    /// Denied until the oldest entry leaves the window
    Limited {
        /// Milliseconds until a retry can succeed (never negative)
        retry_after_ms: u64,
    },
}

#[derive(Debug)]
struct WindowState {
    timestamps: Vec<i64>,
    /// Entry is reaped when `now` passes this (TTL = 2 × window)
    expires_at_ms: i64,
}

/// Sliding-window rate limiter keyed by `(user_id, component_ref)`.
///
/// State is in-process; each engine instance enforces its own windows.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<(String, String), WindowState>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check and record one request.
    ///
    /// # Errors
    ///
    /// Fails only on a malformed policy window string.
    pub fn check(
        &self,
        user_id: &str,
        component_ref: &ComponentRef,
        policy: &Policy,
    ) -> EngineResult<RateDecision> {
        self.evaluate(user_id, component_ref, policy, true)
    }

    /// Non-mutating variant of [`check`](Self::check).
    pub fn status(
        &self,
        user_id: &str,
        component_ref: &ComponentRef,
        policy: &Policy,
    ) -> EngineResult<RateDecision> {
        self.evaluate(user_id, component_ref, policy, false)
    }

    /// Drop the window for one key.
    pub fn reset(&self, user_id: &str, component_ref: &ComponentRef) {
        self.windows
            .remove(&(user_id.to_string(), component_ref.to_string()));
    }

    fn evaluate(
        &self,
        user_id: &str,
        component_ref: &ComponentRef,
        policy: &Policy,
        record: bool,
    ) -> EngineResult<RateDecision> {
        let Some(rate_limit) = &policy.rate_limit else {
            return Ok(RateDecision::Unlimited);
        };

        let window_ms = rate_limit.window_ms()? as i64;
        let max = rate_limit.requests as usize;
        let now = Utc::now().timestamp_millis();
        let window_start = now - window_ms;

        let key = (user_id.to_string(), component_ref.to_string());
        // The entry lock serializes concurrent checks on the same key.
        let mut entry = self.windows.entry(key).or_insert_with(|| WindowState {
            timestamps: Vec::new(),
            expires_at_ms: now + 2 * window_ms,
        });

        if entry.expires_at_ms < now {
            entry.timestamps.clear();
        }
        entry.timestamps.retain(|ts| *ts >= window_start);

        if entry.timestamps.len() >= max {
            // Empty-but-saturated falls back to `now`, which briefly yields
            // retry_after == window. Known quirk, kept.
            let oldest = entry.timestamps.first().copied().unwrap_or(now);
            let retry_after_ms = (oldest + window_ms - now).max(0) as u64;
            return Ok(RateDecision::Limited { retry_after_ms });
        }

        let remaining = (max - entry.timestamps.len() - 1) as u32;
        if record {
            entry.timestamps.push(now);
            entry.expires_at_ms = now + 2 * window_ms;
        }
        Ok(RateDecision::Allowed { remaining })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::time::Duration;

    use super::*;
    use crate::core::policy::RateLimitConfig;

    fn limited_policy(requests: u32, window: &str) -> Policy {
        Policy {
            rate_limit: Some(RateLimitConfig {
                requests,
                window: window.to_string(),
            }),
            ..Policy::default()
        }
    }

    fn test_ref() -> ComponentRef {
        ComponentRef::parse("catalyst:local.probe:1.0.0").unwrap()
    }

    #[test]
    fn test_no_rate_limit_is_unlimited() {
        let limiter = RateLimiter::new();
        let decision = limiter.check("user-1", &test_ref(), &Policy::default()).unwrap();
        assert_eq!(decision, RateDecision::Unlimited);
    }

    #[test]
    fn test_limit_reached_after_max_requests() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(2, "1m");
        let r = test_ref();

        assert_eq!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { remaining: 0 }
        );

        match limiter.check("user-1", &r, &policy).unwrap() {
            RateDecision::Limited { retry_after_ms } => {
                assert!(retry_after_ms <= 60_000);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "50ms");
        let r = test_ref();

        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Limited { .. }
        ));

        std::thread::sleep(Duration::from_millis(60));

        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "1m");
        let r = test_ref();

        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
        // A different user is a different key.
        assert!(matches!(
            limiter.check("user-2", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
        // A different component is a different key.
        let other = ComponentRef::parse("catalyst:local.other:1.0.0").unwrap();
        assert!(matches!(
            limiter.check("user-1", &other, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_status_does_not_record() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "1m");
        let r = test_ref();

        for _ in 0..5 {
            assert!(matches!(
                limiter.status("user-1", &r, &policy).unwrap(),
                RateDecision::Allowed { .. }
            ));
        }
        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_reset_clears_window() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "1m");
        let r = test_ref();

        let _ = limiter.check("user-1", &r, &policy).unwrap();
        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Limited { .. }
        ));

        limiter.reset("user-1", &r);
        assert!(matches!(
            limiter.check("user-1", &r, &policy).unwrap(),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_malformed_window_fails_loudly() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "sometimes");
        assert!(limiter.check("user-1", &test_ref(), &policy).is_err());
    }

    #[test]
    fn test_retry_after_is_never_negative() {
        let limiter = RateLimiter::new();
        let policy = limited_policy(1, "1ms");
        let r = test_ref();

        let _ = limiter.check("user-1", &r, &policy).unwrap();
        // Even if the window has effectively elapsed between calls, a
        // Limited decision must carry a non-negative retry hint.
        if let RateDecision::Limited { retry_after_ms } = limiter.check("user-1", &r, &policy).unwrap()
        {
            assert!(retry_after_ms <= 1);
        }
    }
}
