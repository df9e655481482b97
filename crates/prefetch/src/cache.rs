//! # Segment Cache
//!
//! The prefetch engine: speculatively fetches manifest-discovered segments,
//! serves already-fetched bytes immediately, and deduplicates concurrent
//! fetches of the same segment. One instance per proxy session.
//!
//! All slot-store reads and writes, including the start-fetch decision, are
//! serialized under a single mutex. The lock is never held across an `.await`
//! and never while a listener runs, so listeners may re-enter the cache.
//! Continuations re-resolve their slot by key after every suspension point;
//! an index is only trusted at the instant of lookup.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::SegmentCacheConfig;
use crate::error::PrefetchError;
use crate::fetch::SegmentFetcher;
use crate::key::{derive_key, is_segment_url};
use crate::store::{SegmentListener, SegmentSlot, SlotState, SlotStore};

/// Result of a synchronous cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentLookup {
    /// URL does not name a media segment; the cache does not apply.
    NotApplicable,
    /// No slot exists for the key.
    Miss,
    /// A fetch for the key is in flight; register a listener instead of
    /// polling.
    Pending,
    /// Cached payload.
    Hit(Bytes),
}

/// In-memory prefetch cache for media segments.
///
/// Cheap to clone; clones share the same slot store and transport.
#[derive(Clone)]
pub struct SegmentCache {
    store: Arc<Mutex<SlotStore>>,
    fetcher: Arc<dyn SegmentFetcher>,
    config: Arc<SegmentCacheConfig>,
}

impl SegmentCache {
    /// Create a cache with the given configuration and injected transport.
    ///
    /// # Panics
    ///
    /// Panics if `max_segments` is zero.
    pub fn new(config: SegmentCacheConfig, fetcher: Arc<dyn SegmentFetcher>) -> Self {
        assert!(
            config.max_segments > 0,
            "max_segments must be greater than zero"
        );
        Self {
            store: Arc::new(Mutex::new(SlotStore::new())),
            fetcher,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SegmentCacheConfig {
        &self.config
    }

    fn key_for(&self, url: &str) -> String {
        derive_key(url, self.config.key_strategy)
    }

    /// Start a speculative fetch for `url`.
    ///
    /// No-op when the URL is not a segment or when a slot for its key already
    /// exists (the fetch is already started or resolved). Returns the handle
    /// of the spawned fetch task when one was started; fire-and-forget
    /// callers can drop it.
    pub fn prefetch(&self, url: &str) -> Option<JoinHandle<()>> {
        if !is_segment_url(url) {
            return None;
        }
        let key = self.key_for(url);
        {
            let mut store = self.store.lock();
            if store.find_by_key(&key).is_some() {
                return None;
            }
            // Placeholder inserted before the fetch is issued, so a second
            // prefetch for the same key sees the slot and backs off.
            store.append(SegmentSlot::pending(key.clone()));
        }
        debug!(key = %key, "prefetch (start)");

        let cache = self.clone();
        let url = url.to_owned();
        Some(tokio::spawn(async move {
            match cache.fetcher.fetch_segment(&url).await {
                Ok(payload) => cache.complete_fetch(&key, payload),
                Err(e) => cache.fail_fetch(&key, &e),
            }
        }))
    }

    /// Success continuation. Runs after the fetch's await point, so the slot
    /// is re-resolved by key; eviction may have removed it in the meantime.
    fn complete_fetch(&self, key: &str, payload: Bytes) {
        debug!(key = %key, bytes = payload.len(), "prefetch (complete)");

        let waiters = {
            let mut store = self.store.lock();
            let Some(slot) = store.find_mut_by_key(key) else {
                // The fetch outlasted its own cache entry. Contained here:
                // drop the payload, never crash the host, never retry.
                let e = PrefetchError::EvictedInFlight {
                    key: key.to_owned(),
                };
                error!(key = %key, "{e}");
                return;
            };
            let waiters =
                match std::mem::replace(&mut slot.state, SlotState::Ready(payload.clone())) {
                    SlotState::PendingWithWaiters(waiters) => waiters,
                    _ => Vec::new(),
                };
            store.enforce_capacity(self.config.max_segments);
            waiters
        };

        for waiter in waiters {
            waiter(payload.clone());
            debug!(key = %key, "cache (listener notified)");
        }
    }

    /// Failure continuation: the slot is removed entirely so a later
    /// prefetch starts fresh. Queued waiters are dropped unnotified.
    fn fail_fetch(&self, key: &str, e: &PrefetchError) {
        warn!(key = %key, "prefetch (error)");
        debug!(key = %key, error = %e, "prefetch (error detail)");

        let mut store = self.store.lock();
        if let Some(index) = store.find_by_key(key) {
            store.evict(index, 1);
        }
    }

    /// Synchronous lookup. Never blocks; a pending result means the caller
    /// should register a listener via [`add_listener`](Self::add_listener).
    pub fn get(&self, url: &str) -> SegmentLookup {
        if !is_segment_url(url) {
            return SegmentLookup::NotApplicable;
        }
        let key = self.key_for(url);

        let store = self.store.lock();
        let Some(slot) = store.find_by_key(&key).and_then(|i| store.slot(i)) else {
            debug!(key = %key, "cache (miss)");
            return SegmentLookup::Miss;
        };
        match &slot.state {
            SlotState::Ready(payload) => {
                debug!(key = %key, "cache (hit)");
                SegmentLookup::Hit(payload.clone())
            }
            SlotState::Pending | SlotState::PendingWithWaiters(_) => {
                debug!(key = %key, "cache (pending prefetch)");
                SegmentLookup::Pending
            }
        }
    }

    /// Register a listener for the completion of a pending fetch, or invoke
    /// it immediately when the payload is already cached.
    ///
    /// Returns `false` when the URL is not a segment. The caller is expected
    /// to have triggered `prefetch` already; when no slot exists this is a
    /// no-op that still returns `true`.
    pub fn add_listener(&self, url: &str, listener: SegmentListener) -> bool {
        if !is_segment_url(url) {
            return false;
        }
        let key = self.key_for(url);

        let immediate = {
            let mut store = self.store.lock();
            let Some(slot) = store.find_mut_by_key(&key) else {
                return true;
            };
            match &mut slot.state {
                state @ SlotState::Pending => {
                    *state = SlotState::PendingWithWaiters(vec![listener]);
                    debug!(key = %key, "cache (listener queued)");
                    None
                }
                SlotState::PendingWithWaiters(waiters) => {
                    waiters.push(listener);
                    debug!(key = %key, "cache (listener queued)");
                    None
                }
                SlotState::Ready(payload) => Some((payload.clone(), listener)),
            }
        };

        if let Some((payload, listener)) = immediate {
            listener(payload);
            debug!(key = %key, "cache (listener notified)");
        }
        true
    }

    /// Snapshot of the cached keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.store.lock().keys()
    }

    /// Current number of slots, pending ones included.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Notify;

    use super::*;
    use crate::fetch::SegmentFetcher;
    use crate::key::KeyStrategy;

    #[inline]
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    /// Transport double: counts fetches, can fail on demand, and can hold a
    /// fetch open on a per-URL gate so pending states are deterministic.
    struct MockFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
        gates: parking_lot::Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl MockFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gates: parking_lot::Mutex::new(HashMap::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        /// Hold fetches for `url` open until the returned notify fires.
        fn gate(&self, url: &str) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            self.gates.lock().insert(url.to_owned(), notify.clone());
            notify
        }
    }

    #[async_trait]
    impl SegmentFetcher for MockFetcher {
        async fn fetch_segment(&self, url: &str) -> Result<Bytes, PrefetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gates.lock().get(url).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                Err(PrefetchError::SegmentFetch(format!(
                    "scripted failure for {url}"
                )))
            } else {
                Ok(Bytes::from(url.to_owned()))
            }
        }
    }

    fn test_cache(max_segments: usize, fetcher: Arc<MockFetcher>) -> SegmentCache {
        let config = SegmentCacheConfig::builder()
            .with_max_segments(max_segments)
            .build();
        SegmentCache::new(config, fetcher)
    }

    #[tokio::test]
    async fn prefetch_then_hit() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        cache.prefetch(url).expect("fetch started").await.unwrap();

        assert_eq!(cache.get(url), SegmentLookup::Hit(Bytes::from(url)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_prefetches_trigger_one_fetch() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        let gate = fetcher.gate(url);

        let handle = cache.prefetch(url).expect("first call starts the fetch");
        assert!(cache.prefetch(url).is_none(), "second call is a no-op");

        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        // Resolved slot still dedups.
        assert!(cache.prefetch(url).is_none());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn pending_is_visible_while_the_fetch_is_outstanding() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        let gate = fetcher.gate(url);

        let handle = cache.prefetch(url).unwrap();
        assert_eq!(cache.get(url), SegmentLookup::Pending);

        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(cache.get(url), SegmentLookup::Hit(Bytes::from(url)));
    }

    #[tokio::test]
    async fn capacity_bound_holds_across_many_prefetches() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(3, fetcher.clone());

        for i in 0..10 {
            let url = format!("http://x/hls/{i}.ts");
            cache.prefetch(&url).unwrap().await.unwrap();
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.keys(), vec!["7.ts", "8.ts", "9.ts"]);
    }

    #[tokio::test]
    async fn fifo_eviction_removes_the_oldest_segment() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(2, fetcher.clone());

        for url in ["http://x/hls/1.ts", "http://x/hls/2.ts", "http://x/hls/3.ts"] {
            cache.prefetch(url).unwrap().await.unwrap();
        }

        assert_eq!(cache.get("http://x/hls/1.ts"), SegmentLookup::Miss);
        assert!(matches!(
            cache.get("http://x/hls/2.ts"),
            SegmentLookup::Hit(_)
        ));
        assert!(matches!(
            cache.get("http://x/hls/3.ts"),
            SegmentLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn listeners_fire_once_in_registration_order() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        let gate = fetcher.gate(url);
        let handle = cache.prefetch(url).unwrap();

        let events: Arc<parking_lot::Mutex<Vec<(u8, Bytes)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        for id in [1u8, 2u8] {
            let events = events.clone();
            assert!(cache.add_listener(
                url,
                Box::new(move |payload| {
                    events.lock().push((id, payload));
                })
            ));
        }

        gate.notify_one();
        handle.await.unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 1);
        assert_eq!(events[1].0, 2);
        assert_eq!(events[0].1, events[1].1);
        assert_eq!(events[0].1, Bytes::from(url));
    }

    #[tokio::test]
    async fn listener_on_a_ready_slot_fires_immediately() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        cache.prefetch(url).unwrap().await.unwrap();

        let fired: Arc<parking_lot::Mutex<Option<Bytes>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let fired_clone = fired.clone();
        assert!(cache.add_listener(
            url,
            Box::new(move |payload| {
                *fired_clone.lock() = Some(payload);
            })
        ));

        assert_eq!(fired.lock().as_ref(), Some(&Bytes::from(url)));
    }

    #[tokio::test]
    async fn listener_without_a_slot_is_a_noop_that_returns_true() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        assert!(cache.add_listener(
            "http://x/hls/1.ts",
            Box::new(move |_| fired_clone.store(true, Ordering::SeqCst))
        ));
        assert!(!fired.load(Ordering::SeqCst));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_trace() {
        init_tracing();
        let fetcher = MockFetcher::new();
        fetcher.set_failing(true);
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        cache.prefetch(url).unwrap().await.unwrap();
        assert_eq!(cache.get(url), SegmentLookup::Miss);
        assert_eq!(fetcher.calls(), 1);

        // No negative caching: the next prefetch starts fresh.
        fetcher.set_failing(false);
        cache.prefetch(url).expect("fresh fetch").await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(matches!(cache.get(url), SegmentLookup::Hit(_)));
    }

    #[tokio::test]
    async fn failed_fetch_drops_waiters_unnotified() {
        init_tracing();
        let fetcher = MockFetcher::new();
        fetcher.set_failing(true);
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/1.ts";
        let gate = fetcher.gate(url);
        let handle = cache.prefetch(url).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        cache.add_listener(
            url,
            Box::new(move |_| fired_clone.store(true, Ordering::SeqCst)),
        );

        gate.notify_one();
        handle.await.unwrap();

        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(cache.get(url), SegmentLookup::Miss);
    }

    #[tokio::test]
    async fn non_segment_urls_pass_through_untouched() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        let url = "http://x/hls/index.m3u8";
        assert!(cache.prefetch(url).is_none());
        assert_eq!(cache.get(url), SegmentLookup::NotApplicable);
        assert!(!cache.add_listener(url, Box::new(|_| {})));
        assert_eq!(fetcher.calls(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn completion_after_eviction_is_contained() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(1, fetcher.clone());

        let url_a = "http://x/hls/1.ts";
        let url_b = "http://x/hls/2.ts";
        let gate_a = fetcher.gate(url_a);
        let gate_b = fetcher.gate(url_b);

        let handle_a = cache.prefetch(url_a).unwrap();
        let handle_b = cache.prefetch(url_b).unwrap();

        // B completes first; capacity 1 evicts A's pending placeholder.
        gate_b.notify_one();
        handle_b.await.unwrap();
        assert_eq!(cache.len(), 1);

        // A's completion finds no slot; the error is contained, not a panic.
        gate_a.notify_one();
        handle_a.await.unwrap();

        assert_eq!(cache.get(url_a), SegmentLookup::Miss);
        assert!(matches!(cache.get(url_b), SegmentLookup::Hit(_)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn hit_has_no_eviction_side_effect() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let cache = test_cache(20, fetcher.clone());

        for url in ["http://x/hls/1.ts", "http://x/hls/2.ts", "http://x/hls/3.ts"] {
            cache.prefetch(url).unwrap().await.unwrap();
        }

        // Reading a newer segment must not prune the older ones.
        assert!(matches!(
            cache.get("http://x/hls/3.ts"),
            SegmentLookup::Hit(_)
        ));
        assert_eq!(cache.keys(), vec!["1.ts", "2.ts", "3.ts"]);
    }

    #[tokio::test]
    async fn full_url_strategy_keys_by_the_whole_url() {
        init_tracing();
        let fetcher = MockFetcher::new();
        let config = SegmentCacheConfig::builder()
            .with_key_strategy(KeyStrategy::FullUrl)
            .build();
        let cache = SegmentCache::new(config, fetcher.clone());

        // Same sequence number on different hosts: distinct slots.
        cache.prefetch("http://a/hls/1.ts").unwrap().await.unwrap();
        cache.prefetch("http://b/hls/1.ts").unwrap().await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    #[should_panic(expected = "max_segments must be greater than zero")]
    fn zero_capacity_panics() {
        let config = SegmentCacheConfig {
            max_segments: 0,
            ..SegmentCacheConfig::default()
        };
        SegmentCache::new(config, MockFetcher::new());
    }
}
