//! Bounded TTL cache for lookup results.
//!
//! Concurrent requests for the same key are coalesced into a single
//! directory round trip; the computed value fans out to every waiter.
//! Failed computations are never cached, so a transient outage does not
//! poison subsequent lookups.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use adrealm_core::config::{CacheSettings, GroupLookupStrategy};
use adrealm_core::error::{Error, Result};

/// Cache key for a lookup. The strategy participates because token-groups
/// and recursive resolution can legitimately produce different group sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    /// Domain the lookup is scoped to.
    pub domain: String,
    /// The user or group name being resolved.
    pub principal: String,
    /// Group resolution strategy in effect for the lookup.
    pub strategy: GroupLookupStrategy,
}

impl LookupKey {
    /// Creates a key.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        principal: impl Into<String>,
        strategy: GroupLookupStrategy,
    ) -> Self {
        Self {
            domain: domain.into(),
            principal: principal.into(),
            strategy,
        }
    }
}

/// TTL-bounded cache over lookup results of type `T`.
///
/// A zero size or zero TTL disables caching entirely; the cache then acts as
/// a transparent pass-through and every call computes fresh.
pub struct LookupCache<T: Clone + Send + Sync + 'static> {
    inner: Option<Cache<LookupKey, T>>,
}

impl<T: Clone + Send + Sync + 'static> LookupCache<T> {
    /// Builds a cache from settings, disabled when either bound is zero.
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        if settings.is_disabled() {
            return Self { inner: None };
        }
        let inner = Cache::builder()
            .max_capacity(settings.size)
            .time_to_live(Duration::from_secs(settings.ttl_secs))
            .build();
        Self { inner: Some(inner) }
    }

    /// Whether the cache was configured on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the cached value for `key`, or runs `compute` and stores the
    /// result. Concurrent callers with the same key share one computation.
    ///
    /// # Errors
    ///
    /// Propagates the computation's error; errors are not cached.
    pub async fn get_or_compute<F>(&self, key: LookupKey, compute: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match &self.inner {
            None => compute.await,
            Some(cache) => cache
                .try_get_with(key, compute)
                .await
                .map_err(|err: Arc<Error>| (*err).clone()),
        }
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(principal: &str) -> LookupKey {
        LookupKey::new("example.com", principal, GroupLookupStrategy::Auto)
    }

    #[tokio::test]
    async fn coalesces_concurrent_computations() {
        let cache: LookupCache<String> = LookupCache::new(&CacheSettings {
            size: 16,
            ttl_secs: 60,
        });
        let calls = AtomicUsize::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("value".to_string())
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute(key("fred"), compute()),
            cache.get_or_compute(key("fred"), compute()),
        );

        assert_eq!(a.unwrap(), "value");
        assert_eq!(b.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: LookupCache<String> = LookupCache::new(&CacheSettings {
            size: 16,
            ttl_secs: 60,
        });

        let first = cache
            .get_or_compute(key("fred"), async {
                Err(Error::UserNotFound("fred".to_string()))
            })
            .await;
        assert_eq!(first.unwrap_err(), Error::UserNotFound("fred".to_string()));

        let second = cache
            .get_or_compute(key("fred"), async { Ok("recovered".to_string()) })
            .await;
        assert_eq!(second.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn expired_entries_recompute() {
        let cache: LookupCache<String> = LookupCache::new(&CacheSettings {
            size: 16,
            ttl_secs: 1,
        });
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_compute(key("fred"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("value".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        cache
            .get_or_compute(key("fred"), async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("value".to_string())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_size_disables_caching() {
        let cache: LookupCache<String> = LookupCache::new(&CacheSettings {
            size: 0,
            ttl_secs: 60,
        });
        assert!(!cache.is_enabled());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(key("fred"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("value".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn distinct_strategies_do_not_share_entries() {
        let cache: LookupCache<String> = LookupCache::new(&CacheSettings {
            size: 16,
            ttl_secs: 60,
        });

        cache
            .get_or_compute(
                LookupKey::new("example.com", "fred", GroupLookupStrategy::TokenGroups),
                async { Ok("token".to_string()) },
            )
            .await
            .unwrap();

        let recursive = cache
            .get_or_compute(
                LookupKey::new("example.com", "fred", GroupLookupStrategy::Recursive),
                async { Ok("recursive".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(recursive, "recursive");
    }
}
