//! Read-through policy cache.
//!
//! Policies are read on every execution pre-flight; this cache keeps the
//! hot path off the metadata store. Reads route through an LRU with a TTL,
//! and any administrator-visible policy change calls
//! [`invalidate`](PolicyCache::invalidate) so the next read reloads.
//!
//! A global generation counter closes the load/insert race: a lookup that
//! was in flight when an invalidation happened is not inserted, so the
//! cache never serves a policy invalidated after the read began.

// Layer 1: Standard library imports
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use lru::LruCache;
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::core::error::EngineResult;
use crate::core::policy::Policy;
use crate::core::reference::ComponentRef;
use crate::core::storage::Storage;

struct CacheEntry {
    policy: Policy,
    inserted: Instant,
}

/// Read-through cache over `Storage::get_policy`.
///
/// Only present policies are cached; a missing policy always consults the
/// store, so granting a first policy takes effect immediately.
pub struct PolicyCache {
    storage: Arc<dyn Storage>,
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
    generation: AtomicU64,
}

impl PolicyCache {
    /// Create a cache over `storage` with the given TTL and capacity.
    pub fn new(storage: Arc<dyn Storage>, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    /// Fetch the policy for a component, `None` when unset.
    pub async fn get(&self, component_ref: &ComponentRef) -> EngineResult<Option<Policy>> {
        let key = component_ref.to_string();

        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&key) {
                if entry.inserted.elapsed() < self.ttl {
                    return Ok(Some(entry.policy.clone()));
                }
                entries.pop(&key);
            }
        }

        // Capture the generation before the store read; an invalidation
        // during the read makes the insert below a no-op.
        let generation = self.generation.load(Ordering::Acquire);
        let loaded = self.storage.get_policy(component_ref).await?;

        if let Some(policy) = &loaded {
            if self.generation.load(Ordering::Acquire) == generation {
                self.entries.lock().put(
                    key,
                    CacheEntry {
                        policy: policy.clone(),
                        inserted: Instant::now(),
                    },
                );
            }
        }
        Ok(loaded)
    }

    /// Drop the cached entry for one component.
    pub fn invalidate(&self, component_ref: &ComponentRef) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.lock().pop(&component_ref.to_string());
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::core::storage::MemoryStorage;

    fn test_ref() -> ComponentRef {
        ComponentRef::parse("catalyst:local.probe:1.0.0").unwrap()
    }

    fn policy_with_domain(domain: &str) -> Policy {
        Policy {
            allowed_domains: vec![domain.to_string()],
            ..Policy::default()
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let storage = Arc::new(MemoryStorage::new());
        let r = test_ref();
        storage.set_policy(&r, policy_with_domain("api.example.com"));

        let cache = PolicyCache::new(storage.clone(), Duration::from_secs(30), 16);
        let first = cache.get(&r).await.unwrap().unwrap();
        assert!(first.allows_domain("api.example.com"));

        // Change the store behind the cache's back; TTL still serves the
        // cached value.
        storage.set_policy(&r, policy_with_domain("other.example.com"));
        let second = cache.get(&r).await.unwrap().unwrap();
        assert!(second.allows_domain("api.example.com"));
    }

    #[tokio::test]
    async fn test_invalidate_reloads() {
        let storage = Arc::new(MemoryStorage::new());
        let r = test_ref();
        storage.set_policy(&r, policy_with_domain("api.example.com"));

        let cache = PolicyCache::new(storage.clone(), Duration::from_secs(30), 16);
        let _ = cache.get(&r).await.unwrap();

        storage.set_policy(&r, policy_with_domain("other.example.com"));
        cache.invalidate(&r);

        let reloaded = cache.get(&r).await.unwrap().unwrap();
        assert!(reloaded.allows_domain("other.example.com"));
        assert!(!reloaded.allows_domain("api.example.com"));
    }

    #[tokio::test]
    async fn test_expired_ttl_reloads() {
        let storage = Arc::new(MemoryStorage::new());
        let r = test_ref();
        storage.set_policy(&r, policy_with_domain("api.example.com"));

        let cache = PolicyCache::new(storage.clone(), Duration::from_millis(0), 16);
        let _ = cache.get(&r).await.unwrap();

        storage.set_policy(&r, policy_with_domain("other.example.com"));
        let reloaded = cache.get(&r).await.unwrap().unwrap();
        assert!(reloaded.allows_domain("other.example.com"));
    }

    #[tokio::test]
    async fn test_missing_policy_is_not_cached() {
        let storage = Arc::new(MemoryStorage::new());
        let r = test_ref();

        let cache = PolicyCache::new(storage.clone(), Duration::from_secs(30), 16);
        assert!(cache.get(&r).await.unwrap().is_none());

        // First grant is visible immediately, no invalidation needed.
        storage.set_policy(&r, policy_with_domain("api.example.com"));
        assert!(cache.get(&r).await.unwrap().is_some());
    }
}
