//! In-memory response cache (§4.2).
//!
//! A bounded mapping from cache fingerprint to serialised response bytes.
//! Reads are lock-free via `DashMap`'s sharded locking; only entries for the
//! same key ever contend with each other, satisfying "writes serialised per
//! key, concurrent reads permitted" from §3.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct CacheEntry {
    body: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Bounded, TTL-expiring response cache keyed by the fingerprint derived in
/// `ChatCompletionRequest::cache_fingerprint`.
pub struct Cache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    default_ttl: Duration,
    access_clock: AtomicU64,
}

impl Cache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            capacity,
            default_ttl,
            access_clock: AtomicU64::new(0),
        })
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached body if present and not expired, bumping its
    /// last-access time.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        Some(entry.body.clone())
    }

    /// Stores (overwriting) an entry, then evicts least-recently-used
    /// entries until the map is back under capacity.
    pub fn put(&self, key: String, body: Vec<u8>, ttl: Option<Duration>) {
        let now = self.tick();
        self.entries.insert(
            key,
            CacheEntry {
                body,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                last_access: AtomicU64::new(now),
            },
        );
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let mut by_access: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_access.load(Ordering::Relaxed)))
            .collect();
        by_access.sort_by_key(|(_, access)| *access);
        let overflow = self.entries.len().saturating_sub(self.capacity);
        for (key, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }

    /// Removes all expired entries. Called periodically by the background
    /// sweeper and directly by tests.
    pub fn sweep_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the background eviction sweep named in §4.2. The returned
    /// token, when cancelled, stops the sweep on the next tick — used during
    /// graceful shutdown (§4.1 "signal cache's background eviction to
    /// stop").
    pub fn spawn_eviction_sweep(
        self: &Arc<Self>,
        interval: Duration,
    ) -> (tokio::task::JoinHandle<()>, CancellationToken) {
        let cache = self.clone();
        let token = CancellationToken::new();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        tracing::debug!("cache eviction sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
        });
        (handle, token)
    }
}
