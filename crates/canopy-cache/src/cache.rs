//! TTL cache with optional LRU bound.
//!
//! # Concurrency model
//!
//! Entries live behind a `tokio::sync::RwLock`. Hits only take the read
//! lock; the last-access time used for LRU is an atomic on the entry. A read
//! that finds an expired entry upgrades to the write lock to remove it.
//!
//! Population is plain read-through: two callers that miss on the same key
//! at the same time will both compute and both `put`. The later write wins.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};

/// Configuration for a [`TtlCache`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Name used in log output.
    pub name: String,
    /// Age after which an entry is never returned.
    pub ttl: Duration,
    /// Entry bound; `None` is unbounded.
    pub max_entries: Option<usize>,
}

impl CacheConfig {
    pub fn new(name: &str, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            max_entries: None,
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by the LRU bound or by expiry.
    pub evictions: u64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    /// Nanos since the cache epoch.
    last_accessed_nanos: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) >= ttl
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Keyed cache whose entries expire a fixed TTL after insertion.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    epoch: Instant,
    counters: Counters,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Cache backed by the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
            epoch,
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn nanos_now(&self) -> u64 {
        self.clock.now().saturating_duration_since(self.epoch).as_nanos() as u64
    }

    /// Look up a key. Returns `None` on miss or expiry; an expired entry is
    /// removed.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now, self.config.ttl) => {
                    entry
                        .last_accessed_nanos
                        .store(self.nanos_now(), Ordering::Relaxed);
                    let hits = self.counters.hits.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(cache = %self.config.name, key = ?key, cache_hits = hits, "cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    let misses = self.counters.misses.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(cache = %self.config.name, key = ?key, cache_misses = misses, "cache miss");
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a concurrent put may have
        // refreshed it.
        let mut entries = self.entries.write().await;
        let now = self.clock.now();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now, self.config.ttl) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        let misses = self.counters.misses.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(cache = %self.config.name, key = ?key, cache_misses = misses, "cache miss (expired)");
        None
    }

    /// Insert or replace an entry. At capacity, the least-recently-used
    /// entry is evicted first.
    pub async fn put(&self, key: K, value: V) {
        let now = self.clock.now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            last_accessed_nanos: AtomicU64::new(self.nanos_now()),
        };

        let mut entries = self.entries.write().await;
        if let Some(max) = self.config.max_entries {
            while !entries.contains_key(&key) && entries.len() >= max.max(1) {
                if !self.evict_lru(&mut entries) {
                    break;
                }
            }
        }
        entries.insert(key, entry);
    }

    fn evict_lru(&self, entries: &mut HashMap<K, CacheEntry<V>>) -> bool {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed_nanos.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone());

        match lru_key {
            Some(key) => {
                entries.remove(&key);
                let evictions = self.counters.evictions.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    cache = %self.config.name,
                    evicted = ?key,
                    cache_evictions = evictions,
                    "cache LRU eviction"
                );
                true
            }
            None => false,
        }
    }

    /// Remove one key. Returns whether it was present.
    pub async fn invalidate(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Remove every entry whose key matches. Returns the number removed.
    pub async fn invalidate_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !predicate(k));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now, ttl));
        let purged = before - entries.len();
        if purged > 0 {
            self.counters
                .evictions
                .fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Periodically purge expired entries until `cancel` fires.
pub fn spawn_cleanup<K, V>(
    cache: Arc<TtlCache<K, V>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(cache = %cache.name(), "cache cleanup stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        let stats = cache.stats();
                        tracing::info!(
                            cache = %cache.name(),
                            purged,
                            cache_hits = stats.hits,
                            cache_misses = stats.misses,
                            cache_evictions = stats.evictions,
                            "purged expired cache entries"
                        );
                    }
                }
            }
        }
    })
}
