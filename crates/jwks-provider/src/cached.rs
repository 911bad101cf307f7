//! Key provider that memoizes resolved keys in memory.
//!
//! Entries expire `ttl` after insertion and the store never holds more than
//! `capacity` entries; when full, the oldest insertion is evicted. Failures
//! are never cached.
//!
//! Concurrent misses for the same `kid` coalesce into one call to the
//! wrapped provider (single-flight). The first miss spawns the fetch as its
//! own task and publishes a shared handle to it in the in-flight map; later
//! misses attach to that handle. The task stores a successful result and
//! removes its in-flight entry before any waiter observes the outcome, so
//! the next miss after completion starts a fresh fetch. Dropping every waiter
//! does not stop the task, and the task only holds a weak reference to the
//! cache, so an abandoned fetch neither lingers in the map nor keeps a
//! dropped provider alive.
//!
//! Lock order is fixed: the in-flight map may be held while briefly taking
//! the entry store, never the reverse. Neither lock is held across an
//! `.await`.

use crate::error::{JwksError, Result};
use crate::jwk::Jwk;
use crate::observability::metrics::{record_cache_lookup, record_fetch_coalesced, set_cache_entries};
use crate::provider::KeyProvider;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Default maximum number of cached keys.
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

/// Default time a key stays cached (10 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60 * 60);

type SharedFetch = Shared<BoxFuture<'static, Result<Jwk>>>;

/// Outcome of a miss once the in-flight lock is held.
enum Pending {
    /// Another fetch stored the key in the meantime.
    Stored(Jwk),
    /// Fetch to await, started or joined.
    Fetch(SharedFetch),
}

/// A cached key. Replaced wholesale, never mutated.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Jwk,
    inserted_at: Instant,
}

/// Entries plus their insertion order for eviction.
#[derive(Debug, Default)]
struct Entries {
    by_kid: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl Entries {
    fn remove(&mut self, kid: &str) {
        if self.by_kid.remove(kid).is_some() {
            self.order.retain(|k| k != kid);
        }
    }
}

struct CacheState {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<Entries>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl CacheState {
    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh entry for `kid`, dropping it if it has expired.
    fn lookup(&self, kid: &str) -> Option<Jwk> {
        let mut entries = self.entries();
        let inserted_at = entries.by_kid.get(kid)?.inserted_at;

        if Instant::now().saturating_duration_since(inserted_at) < self.ttl {
            record_cache_lookup("hit");
            return entries.by_kid.get(kid).map(|entry| entry.value.clone());
        }

        entries.remove(kid);
        record_cache_lookup("expired");
        set_cache_entries(entries.by_kid.len());
        debug!(target: "jwks.cache", kid = %kid, "Cached key expired");
        None
    }

    fn insert(&self, kid: String, value: Jwk) {
        let mut entries = self.entries();
        entries.remove(&kid);

        while entries.by_kid.len() >= self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.by_kid.remove(&oldest);
            debug!(target: "jwks.cache", kid = %oldest, "Evicted cached key at capacity");
        }

        entries.order.push_back(kid.clone());
        entries.by_kid.insert(
            kid,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        set_cache_entries(entries.by_kid.len());
    }
}

/// Unregisters an in-flight fetch when its task ends, including by panic or
/// runtime shutdown.
struct InFlightGuard {
    state: Weak<CacheState>,
    kid: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.in_flight().remove(&self.kid);
        }
    }
}

/// Caching decorator around another [`KeyProvider`].
pub struct CachedKeyProvider {
    inner: Arc<dyn KeyProvider>,
    state: Arc<CacheState>,
}

impl fmt::Debug for CachedKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedKeyProvider")
            .field("capacity", &self.state.capacity)
            .field("ttl", &self.state.ttl)
            .field("inner", &self.inner)
            .finish()
    }
}

impl CachedKeyProvider {
    /// Wrap `inner` with the default capacity (5) and TTL (10 hours).
    #[must_use]
    pub fn new(inner: Arc<dyn KeyProvider>) -> Self {
        Self {
            inner,
            state: Arc::new(CacheState {
                capacity: DEFAULT_CACHE_CAPACITY,
                ttl: DEFAULT_CACHE_TTL,
                entries: Mutex::new(Entries::default()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wrap `inner` with an explicit capacity and TTL.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if `capacity` or `ttl` is
    /// zero.
    pub fn with_limits(inner: Arc<dyn KeyProvider>, capacity: usize, ttl: Duration) -> Result<Self> {
        if capacity < 1 {
            return Err(JwksError::InvalidConfiguration(
                "Invalid cache size.".to_string(),
            ));
        }
        if ttl.is_zero() {
            return Err(JwksError::InvalidConfiguration(
                "Invalid cache expiration.".to_string(),
            ));
        }

        Ok(Self {
            inner,
            state: Arc::new(CacheState {
                capacity,
                ttl,
                entries: Mutex::new(Entries::default()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The wrapped provider.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn KeyProvider> {
        &self.inner
    }

    /// Maximum number of cached keys.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// How long a key stays cached.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.state.ttl
    }

    /// Number of keys currently stored, expired ones included until their
    /// next lookup.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.entries().by_kid.len()
    }

    /// Join the in-flight fetch for `kid`, or start one.
    fn join_or_start(&self, kid: &str) -> Pending {
        let mut in_flight = self.state.in_flight();

        if let Some(fetch) = in_flight.get(kid) {
            record_fetch_coalesced();
            debug!(target: "jwks.cache", kid = %kid, "Joining in-flight fetch");
            return Pending::Fetch(fetch.clone());
        }

        // A fetch may have completed between the first lookup and taking the
        // in-flight lock. Completion stores before it unregisters, so the
        // store is authoritative here.
        if let Some(jwk) = self.state.lookup(kid) {
            return Pending::Stored(jwk);
        }

        record_cache_lookup("miss");
        debug!(target: "jwks.cache", kid = %kid, "Cache miss, fetching key");

        let inner = Arc::clone(&self.inner);
        let guard = InFlightGuard {
            state: Arc::downgrade(&self.state),
            kid: kid.to_string(),
        };
        // The task cannot unregister before the insert below: removal waits
        // on the in-flight lock held here.
        let task = tokio::spawn(async move {
            let result = inner.get(&guard.kid).await;
            if let (Ok(jwk), Some(state)) = (&result, guard.state.upgrade()) {
                state.insert(guard.kid.clone(), jwk.clone());
            }
            drop(guard);
            result
        });
        let fetch = async move {
            task.await.unwrap_or_else(|e| {
                Err(JwksError::FetchFailed(format!("Key fetch task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(kid.to_string(), fetch.clone());
        Pending::Fetch(fetch)
    }
}

#[async_trait::async_trait]
impl KeyProvider for CachedKeyProvider {
    /// # Errors
    ///
    /// Whatever the wrapped provider returned for the fetch this call was
    /// coalesced onto. Failures are not cached.
    #[instrument(skip(self), fields(kid = %kid))]
    async fn get(&self, kid: &str) -> Result<Jwk> {
        if let Some(jwk) = self.state.lookup(kid) {
            debug!(target: "jwks.cache", kid = %kid, "JWKS cache hit");
            return Ok(jwk);
        }

        match self.join_or_start(kid) {
            Pending::Fetch(fetch) => fetch.await,
            Pending::Stored(jwk) => Ok(jwk),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::advance;

    /// Returns a differently versioned key on every call, optionally
    /// failing or holding each call until released.
    #[derive(Debug, Default)]
    struct SequenceProvider {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl SequenceProvider {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl KeyProvider for SequenceProvider {
        async fn get(&self, kid: &str) -> Result<Jwk> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(JwksError::FetchFailed(format!("failure {call}")));
            }
            Ok(serde_json::from_value(serde_json::json!({
                "kid": kid,
                "kty": "OKP",
                "version": call
            }))
            .unwrap())
        }
    }

    fn version(jwk: &Jwk) -> u64 {
        jwk.additional.get("version").unwrap().as_u64().unwrap()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn test_defaults() {
        let provider = CachedKeyProvider::new(Arc::new(SequenceProvider::default()));
        assert_eq!(provider.capacity(), 5);
        assert_eq!(provider.ttl(), Duration::from_secs(36_000));
        assert_eq!(provider.entry_count(), 0);
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let inner: Arc<dyn KeyProvider> = Arc::new(SequenceProvider::default());
        assert!(matches!(
            CachedKeyProvider::with_limits(inner.clone(), 0, Duration::from_secs(1)),
            Err(JwksError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            CachedKeyProvider::with_limits(inner, 1, Duration::ZERO),
            Err(JwksError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_debug_shows_inner_provider() {
        let provider = CachedKeyProvider::new(Arc::new(SequenceProvider::default()));
        let debug_str = format!("{provider:?}");
        assert!(debug_str.starts_with("CachedKeyProvider"));
        assert!(debug_str.contains("SequenceProvider"));
    }

    // =========================================================================
    // Hits and Misses
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_second_get_is_served_from_cache() {
        let inner = Arc::new(SequenceProvider::default());
        let provider = CachedKeyProvider::new(inner.clone());

        let first = provider.get("kid-1").await.unwrap();
        let second = provider.get("kid-1").await.unwrap();

        assert_eq!(inner.calls(), 1);
        assert_eq!(version(&first), 0);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_fetch_separately() {
        let inner = Arc::new(SequenceProvider::default());
        let provider = CachedKeyProvider::new(inner.clone());

        provider.get("kid-1").await.unwrap();
        provider.get("kid-2").await.unwrap();
        provider.get("kid-1").await.unwrap();

        assert_eq!(inner.calls(), 2);
        assert_eq!(provider.entry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_one_fetch() {
        let inner = Arc::new(SequenceProvider::default());
        let provider =
            CachedKeyProvider::with_limits(inner.clone(), 5, Duration::from_secs(60)).unwrap();

        provider.get("kid-1").await.unwrap();
        advance(Duration::from_secs(59)).await;
        assert_eq!(version(&provider.get("kid-1").await.unwrap()), 0);

        // Age equal to the TTL is already expired
        advance(Duration::from_secs(1)).await;
        let refreshed = provider.get("kid-1").await.unwrap();
        assert_eq!(version(&refreshed), 1);
        assert_eq!(inner.calls(), 2);

        // The refreshed entry is served again
        assert_eq!(version(&provider.get("kid-1").await.unwrap()), 1);
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_insert() {
        let inner = Arc::new(SequenceProvider::default());
        let provider =
            CachedKeyProvider::with_limits(inner.clone(), 2, Duration::from_secs(60)).unwrap();

        provider.get("a").await.unwrap();
        provider.get("b").await.unwrap();
        // Reading "a" does not protect it: eviction follows insertion order
        provider.get("a").await.unwrap();
        provider.get("c").await.unwrap();
        assert_eq!(provider.entry_count(), 2);
        assert_eq!(inner.calls(), 3);

        // "b" and "c" are still cached, "a" was evicted
        provider.get("b").await.unwrap();
        provider.get("c").await.unwrap();
        assert_eq!(inner.calls(), 3);
        provider.get("a").await.unwrap();
        assert_eq!(inner.calls(), 4);
        assert_eq!(provider.entry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let inner = Arc::new(SequenceProvider {
            fail: true,
            ..SequenceProvider::default()
        });
        let provider = CachedKeyProvider::new(inner.clone());

        let first = provider.get("kid-1").await.unwrap_err();
        let second = provider.get("kid-1").await.unwrap_err();

        assert_eq!(first, JwksError::FetchFailed("failure 0".to_string()));
        assert_eq!(second, JwksError::FetchFailed("failure 1".to_string()));
        assert_eq!(inner.calls(), 2);
        assert_eq!(provider.entry_count(), 0);
    }

    // =========================================================================
    // Single-Flight
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let gate = Arc::new(Notify::new());
        let inner = Arc::new(SequenceProvider {
            gate: Some(gate.clone()),
            ..SequenceProvider::default()
        });
        let provider = Arc::new(CachedKeyProvider::new(inner.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get("kid-1").await })
            })
            .collect();

        // Let every task reach the shared fetch before releasing it
        while provider.state.in_flight().is_empty() || inner.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            let jwk = handle.await.unwrap().unwrap();
            assert_eq!(version(&jwk), 0);
        }
        assert_eq!(inner.calls(), 1);
        assert!(provider.state.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_failure_shared_then_cleared() {
        let gate = Arc::new(Notify::new());
        let inner = Arc::new(SequenceProvider {
            fail: true,
            gate: Some(gate.clone()),
            ..SequenceProvider::default()
        });
        let provider = Arc::new(CachedKeyProvider::new(inner.clone()));

        let first = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("kid-1").await })
        };
        while inner.calls() == 0 {
            tokio::task::yield_now().await;
        }
        let second = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("kid-1").await })
        };
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let expected = JwksError::FetchFailed("failure 0".to_string());
        assert_eq!(first.await.unwrap().unwrap_err(), expected);
        assert_eq!(second.await.unwrap().unwrap_err(), expected);
        assert_eq!(inner.calls(), 1);
        assert!(provider.state.in_flight().is_empty());

        // The next miss starts over
        gate.notify_one();
        assert_eq!(
            provider.get("kid-1").await.unwrap_err(),
            JwksError::FetchFailed("failure 1".to_string())
        );
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let gate = Arc::new(Notify::new());
        let inner = Arc::new(SequenceProvider {
            gate: Some(gate.clone()),
            ..SequenceProvider::default()
        });
        let provider = Arc::new(CachedKeyProvider::new(inner.clone()));

        let a = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("a").await })
        };
        let b = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("b").await })
        };
        while inner.calls() < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        gate.notify_one();

        assert_eq!(a.await.unwrap().unwrap().kid, "a");
        assert_eq!(b.await.unwrap().unwrap().kid, "b");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_completes_and_unregisters() {
        let gate = Arc::new(Notify::new());
        let inner = Arc::new(SequenceProvider {
            gate: Some(gate.clone()),
            ..SequenceProvider::default()
        });
        let provider = Arc::new(CachedKeyProvider::new(inner.clone()));

        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("kid-1").await })
        };
        while inner.calls() == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(provider.state.in_flight().len(), 1);

        // The fetch keeps running with nobody waiting on it
        gate.notify_one();
        while !provider.state.in_flight().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.entry_count(), 1);

        let jwk = provider.get("kid-1").await.unwrap();
        assert_eq!(version(&jwk), 0);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_pending_fetch_does_not_keep_state_alive() {
        let gate = Arc::new(Notify::new());
        let inner = Arc::new(SequenceProvider {
            gate: Some(gate.clone()),
            ..SequenceProvider::default()
        });
        let provider = Arc::new(CachedKeyProvider::new(inner.clone()));
        let state = Arc::downgrade(&provider.state);

        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get("kid-1").await })
        };
        while inner.calls() == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;

        drop(provider);
        assert!(state.upgrade().is_none());

        // The orphaned fetch finishes without a cache to store into
        gate.notify_one();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(inner.calls(), 1);
    }
}
