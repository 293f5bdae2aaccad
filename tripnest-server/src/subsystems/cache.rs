//! Cache store
//!
//! Process-wide map from `ResourceKey` to the latest fetch result. Each key owns
//! a `watch` channel: subscribers are receivers, so the active-subscriber count
//! is the channel's receiver count and every state change reaches all of them.
//!
//! State transitions (begin / resolve / reject / invalidate) run under one
//! mutex and never hold it across an await. Fetches run on detached tasks, so
//! dropping every subscriber never cancels an in-flight read.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tripnest_core::{ErrorInfo, ErrorKind, TripnestError, TripnestResult};

use super::fetcher::Fetcher;
use super::keys::ResourceKey;

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: ResourceKey,
    pub status: CacheStatus,
    /// Last successful value; kept through `Idle` and `Loading` for display.
    pub value: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn idle(key: ResourceKey) -> Self {
        Self {
            key,
            status: CacheStatus::Idle,
            value: None,
            error: None,
            last_fetched_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, CacheStatus::Success | CacheStatus::Error)
    }

    /// Decode the retained value, if any.
    pub fn decode<T: DeserializeOwned>(&self) -> TripnestResult<Option<T>> {
        self.value
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| TripnestError::Other(format!("cached {} has unexpected shape: {}", self.key, e)))
    }

    /// The value of a `Success` entry, or the stored error of an `Error` entry.
    pub fn into_result<T: DeserializeOwned>(self) -> TripnestResult<T> {
        match self.status {
            CacheStatus::Success => self
                .decode()?
                .ok_or_else(|| TripnestError::Other(format!("{} resolved without a value", self.key))),
            CacheStatus::Error => Err(self
                .error
                .map(TripnestError::from)
                .unwrap_or_else(|| TripnestError::Other(format!("{} failed", self.key)))),
            CacheStatus::Idle | CacheStatus::Loading => {
                Err(TripnestError::Other(format!("{} has not settled", self.key)))
            }
        }
    }
}

// ============================================================================
// Freshness
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fresh until explicitly invalidated.
    Session,
    /// Stale once this long has passed since the last successful fetch.
    For(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct FreshnessPolicy {
    by_tag: HashMap<String, Freshness>,
}

impl FreshnessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: impl Into<String>, freshness: Freshness) -> Self {
        self.by_tag.insert(tag.into(), freshness);
        self
    }

    pub fn for_key(&self, key: &ResourceKey) -> Freshness {
        self.by_tag
            .get(key.tag())
            .copied()
            .unwrap_or(Freshness::Session)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A live view of one cache entry. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    key: ResourceKey,
    rx: watch::Receiver<CacheEntry>,
}

impl Subscription {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn current(&self) -> CacheEntry {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the entry is `Success` or `Error`.
    pub async fn settled(&mut self) -> TripnestResult<CacheEntry> {
        self.rx
            .wait_for(CacheEntry::is_settled)
            .await
            .map(|entry| entry.clone())
            .map_err(|_| TripnestError::Other(format!("cache entry {} was dropped", self.key)))
    }

    /// Wait for the entry to settle and decode it.
    pub async fn value<T: DeserializeOwned>(&mut self) -> TripnestResult<T> {
        self.settled().await?.into_result()
    }
}

// ============================================================================
// CacheStore
// ============================================================================

struct Slot {
    tx: watch::Sender<CacheEntry>,
    fetched_at: Option<Instant>,
    /// Set when the entry is invalidated mid-fetch; the arriving result is dropped.
    discard_in_flight: bool,
}

impl Slot {
    fn new(key: ResourceKey) -> Self {
        let (tx, _rx) = watch::channel(CacheEntry::idle(key));
        Self {
            tx,
            fetched_at: None,
            discard_in_flight: false,
        }
    }

    fn status(&self) -> CacheStatus {
        self.tx.borrow().status
    }

    fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    fn is_stale(&self, freshness: Freshness) -> bool {
        match freshness {
            Freshness::Session => false,
            Freshness::For(ttl) => self
                .fetched_at
                .map(|at| at.elapsed() >= ttl)
                .unwrap_or(true),
        }
    }

    fn needs_fetch(&self, freshness: Freshness) -> bool {
        match self.status() {
            CacheStatus::Idle | CacheStatus::Error => true,
            CacheStatus::Loading => false,
            CacheStatus::Success => self.is_stale(freshness),
        }
    }

    fn mark_loading(&mut self) {
        self.tx.send_modify(|e| {
            e.status = CacheStatus::Loading;
            e.error = None;
        });
    }

    fn mark_idle(&mut self) {
        self.fetched_at = None;
        self.tx.send_modify(|e| e.status = CacheStatus::Idle);
    }
}

struct Inner {
    slots: Mutex<HashMap<ResourceKey, Slot>>,
    fetcher: Arc<dyn Fetcher>,
    policy: FreshnessPolicy,
    fetches: AtomicU64,
}

#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub loading: usize,
    pub subscribers: usize,
    pub fetches_started: u64,
}

impl CacheStore {
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: FreshnessPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                fetcher,
                policy,
                fetches: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKey, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current entry, or an `Idle` one if the key was never requested.
    pub fn get(&self, key: &ResourceKey) -> CacheEntry {
        self.lock()
            .get(key)
            .map(|slot| slot.tx.borrow().clone())
            .unwrap_or_else(|| CacheEntry::idle(key.clone()))
    }

    /// Attach to a key, starting a fetch if the entry is idle, stale or failed.
    /// Concurrent subscribers while loading share the in-flight result.
    pub fn subscribe(&self, key: &ResourceKey) -> Subscription {
        let freshness = self.inner.policy.for_key(key);
        let (rx, start) = {
            let mut slots = self.lock();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(key.clone()));
            let rx = slot.tx.subscribe();
            let start = slot.needs_fetch(freshness);
            if start {
                slot.mark_loading();
            }
            (rx, start)
        };

        if start {
            self.spawn_fetch(key.clone());
        }
        Subscription {
            key: key.clone(),
            rx,
        }
    }

    /// Move the entry to `Loading`. Returns `false` when a fetch is already in
    /// flight, in which case the caller must not start another.
    pub fn begin_fetch(&self, key: &ResourceKey) -> bool {
        let mut slots = self.lock();
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()));
        if slot.status() == CacheStatus::Loading {
            return false;
        }
        slot.mark_loading();
        true
    }

    /// Record a successful fetch. Returns `false` if the result was discarded
    /// because the entry was invalidated while it was loading.
    pub fn resolve(&self, key: &ResourceKey, value: Value) -> bool {
        self.complete(key, Ok(value))
    }

    /// Record a failed fetch; the error is kept until the next attempt.
    pub fn reject(&self, key: &ResourceKey, error: ErrorInfo) -> bool {
        self.complete(key, Err(error))
    }

    /// Mark every matching entry `Idle`, keeping its value, and re-fetch the
    /// ones somebody is watching. Loading entries are flagged so their
    /// in-flight result is dropped and fetched again. Returns the match count.
    pub fn invalidate(&self, predicate: impl Fn(&ResourceKey) -> bool) -> usize {
        let mut matched = 0;
        let mut refetch = Vec::new();
        {
            let mut slots = self.lock();
            for (key, slot) in slots.iter_mut().filter(|(k, _)| predicate(k)) {
                matched += 1;
                if slot.status() == CacheStatus::Loading {
                    slot.discard_in_flight = true;
                    continue;
                }
                slot.fetched_at = None;
                if slot.subscribers() > 0 {
                    slot.mark_loading();
                    refetch.push(key.clone());
                } else {
                    slot.mark_idle();
                }
            }
        }

        if matched > 0 {
            tracing::debug!(matched, refetching = refetch.len(), "Invalidated cache entries");
        }
        for key in refetch {
            self.spawn_fetch(key);
        }
        matched
    }

    /// Drop matching entries nobody is watching or loading, e.g. the keys of
    /// a deleted document. Returns how many were removed.
    pub fn forget(&self, predicate: impl Fn(&ResourceKey) -> bool) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|key, slot| {
            !predicate(key) || slot.subscribers() > 0 || slot.status() == CacheStatus::Loading
        });
        before - slots.len()
    }

    /// Re-issue the fetch for a key regardless of freshness. Coalesces with a
    /// fetch already in flight; returns whether a new one was started.
    pub fn refetch(&self, key: &ResourceKey) -> bool {
        if self.begin_fetch(key) {
            self.spawn_fetch(key.clone());
            true
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .lock()
            .values()
            .map(|slot| slot.tx.borrow().clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.lock();
        CacheStats {
            entries: slots.len(),
            loading: slots
                .values()
                .filter(|s| s.status() == CacheStatus::Loading)
                .count(),
            subscribers: slots.values().map(Slot::subscribers).sum(),
            fetches_started: self.inner.fetches.load(Ordering::Relaxed),
        }
    }

    fn complete(&self, key: &ResourceKey, outcome: Result<Value, ErrorInfo>) -> bool {
        let refetch = {
            let mut slots = self.lock();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(key.clone()));

            if slot.discard_in_flight {
                slot.discard_in_flight = false;
                let refetch = slot.subscribers() > 0;
                if refetch {
                    slot.mark_loading();
                } else {
                    slot.mark_idle();
                }
                Some(refetch)
            } else {
                match outcome {
                    Ok(value) => {
                        slot.fetched_at = Some(Instant::now());
                        slot.tx.send_modify(|e| {
                            e.status = CacheStatus::Success;
                            e.value = Some(value);
                            e.error = None;
                            e.last_fetched_at = Some(Utc::now());
                        });
                    }
                    Err(info) => {
                        slot.tx.send_modify(|e| {
                            e.status = CacheStatus::Error;
                            e.error = Some(info);
                        });
                    }
                }
                None
            }
        };

        match refetch {
            None => true,
            Some(again) => {
                tracing::debug!(key = %key, refetch = again, "Discarded result of invalidated fetch");
                if again {
                    self.spawn_fetch(key.clone());
                }
                false
            }
        }
    }

    fn spawn_fetch(&self, key: ResourceKey) {
        let store = self.clone();
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            tracing::debug!(key = %key, "Fetching resource");
            let fetch = store.inner.fetcher.fetch(&key);
            let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.info()),
                Err(_) => Err(ErrorInfo {
                    kind: ErrorKind::Internal,
                    message: format!("fetch for {} panicked", key),
                }),
            };
            if let Err(info) = &outcome {
                tracing::warn!(key = %key, kind = ?info.kind, error = %info.message, "Fetch failed");
            }
            store.complete(&key, outcome);
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Returns the call number as the value, or fails while `fail` is set.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _key: &ResourceKey) -> TripnestResult<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(TripnestError::Network("offline".to_string()));
            }
            Ok(json!(n))
        }
    }

    fn store(fetcher: Arc<CountingFetcher>) -> CacheStore {
        CacheStore::new(
            fetcher,
            FreshnessPolicy::new().with("discover-photos", Freshness::For(Duration::from_secs(3600))),
        )
    }

    // ========================================================================
    // TEST 1: concurrent subscribers share one fetch
    // ========================================================================
    #[tokio::test]
    async fn test_concurrent_subscribers_coalesce() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::itineraries("u1");

        let mut subs: Vec<Subscription> = (0..5).map(|_| cache.subscribe(&key)).collect();
        assert_eq!(subs[0].current().status, CacheStatus::Loading);

        for sub in subs.iter_mut() {
            let v: u64 = sub.value().await.unwrap();
            assert_eq!(v, 1);
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    // ========================================================================
    // TEST 2: invalidate then subscribe triggers exactly one fetch
    // ========================================================================
    #[tokio::test]
    async fn test_invalidate_then_subscribe_fetches_once() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::wishlist("u1");

        {
            let mut sub = cache.subscribe(&key);
            sub.settled().await.unwrap();
        }
        assert_eq!(cache.invalidate(|k| k == &key), 1);
        let idle = cache.get(&key);
        assert_eq!(idle.status, CacheStatus::Idle);
        assert_eq!(idle.value, Some(json!(1)), "prior value retained");

        let mut a = cache.subscribe(&key);
        let mut b = cache.subscribe(&key);
        assert_eq!(a.value::<u64>().await.unwrap(), 2);
        assert_eq!(b.value::<u64>().await.unwrap(), 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    // ========================================================================
    // TEST 3: a result arriving after invalidation is discarded
    // ========================================================================
    #[tokio::test]
    async fn test_invalidated_in_flight_result_is_discarded() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::itineraries("u1");

        let mut sub = cache.subscribe(&key);
        cache.invalidate(|k| k.tag() == "itineraries");

        let entry = sub.settled().await.unwrap();
        assert_eq!(entry.value, Some(json!(2)), "last fetch wins");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    // ========================================================================
    // TEST 4: dropping every subscriber does not cancel the fetch
    // ========================================================================
    #[tokio::test]
    async fn test_unsubscribed_fetch_still_caches() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::user();

        drop(cache.subscribe(&key));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Success);
        assert!(entry.last_fetched_at.is_some());
    }

    // ========================================================================
    // TEST 5: errors are retained and a new subscription retries
    // ========================================================================
    #[tokio::test]
    async fn test_error_retained_until_retry() {
        let fetcher = Arc::new(CountingFetcher::default());
        fetcher.fail.store(true, Ordering::SeqCst);
        let cache = store(fetcher.clone());
        let key = ResourceKey::itinerary("it1");

        let entry = cache.subscribe(&key).settled().await.unwrap();
        assert_eq!(entry.status, CacheStatus::Error);
        assert_eq!(entry.error.as_ref().map(|e| e.kind), Some(ErrorKind::Network));
        assert_eq!(cache.get(&key).status, CacheStatus::Error);

        fetcher.fail.store(false, Ordering::SeqCst);
        let v: u64 = cache.subscribe(&key).value().await.unwrap();
        assert_eq!(v, 2);
    }

    // ========================================================================
    // TEST 6: timed freshness re-fetches once stale
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_timed_freshness() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let photos = ResourceKey::discover_photos();
        let user = ResourceKey::user();

        cache.subscribe(&photos).settled().await.unwrap();
        cache.subscribe(&user).settled().await.unwrap();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let fresh = cache.subscribe(&photos);
        assert_eq!(fresh.current().status, CacheStatus::Success);

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let mut stale = cache.subscribe(&photos);
        assert_eq!(stale.current().status, CacheStatus::Loading);
        stale.settled().await.unwrap();

        // Session-scoped entries never go stale on their own.
        assert_eq!(cache.subscribe(&user).current().status, CacheStatus::Success);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    // ========================================================================
    // TEST 7: begin_fetch coalesces and refetch re-issues
    // ========================================================================
    #[tokio::test]
    async fn test_begin_fetch_and_manual_transitions() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::activities("it1");

        assert!(cache.begin_fetch(&key));
        assert!(!cache.begin_fetch(&key));
        assert!(!cache.refetch(&key));
        assert!(cache.resolve(&key, json!(["a"])));
        assert_eq!(cache.get(&key).status, CacheStatus::Success);

        assert!(cache.begin_fetch(&key));
        assert!(cache.reject(
            &key,
            ErrorInfo {
                kind: ErrorKind::NotFound,
                message: "gone".to_string()
            }
        ));
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Error);
        assert_eq!(entry.value, Some(json!(["a"])));

        let mut sub = cache.subscribe(&key);
        assert_eq!(sub.value::<u64>().await.unwrap(), 1);
        assert!(cache.refetch(&key));
        assert_eq!(sub.changed().await.unwrap().status, CacheStatus::Loading);
        assert_eq!(sub.value::<u64>().await.unwrap(), 2);
        assert_eq!(cache.stats().fetches_started, 2);
    }

    // ========================================================================
    // TEST 8: invalidating an idle key with no subscribers does not fetch
    // ========================================================================
    #[tokio::test]
    async fn test_invalidate_without_subscribers_is_lazy() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let key = ResourceKey::itineraries("u1");
        cache.subscribe(&key).settled().await.unwrap();

        cache.invalidate(|_| true);
        tokio::task::yield_now().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loading, 0);
    }

    // ========================================================================
    // TEST 9: forget drops only unwatched, settled entries
    // ========================================================================
    #[tokio::test]
    async fn test_forget_keeps_watched_entries() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = store(fetcher.clone());
        let gone = ResourceKey::itinerary("it1");
        let watched = ResourceKey::itinerary("it2");

        cache.subscribe(&gone).settled().await.unwrap();
        let mut sub = cache.subscribe(&watched);
        sub.settled().await.unwrap();

        assert_eq!(cache.forget(|k| k.tag() == "itinerary"), 1);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&gone).status, CacheStatus::Idle);
        assert_eq!(cache.get(&watched).status, CacheStatus::Success);
    }
}
