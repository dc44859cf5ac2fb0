//! In-memory response cache with TTL
//!
//! Holds serialized upstream responses for the lifetime of the process.
//! Each proxy process owns its own cache; nothing is shared between
//! processes, so a restarted or scaled-out proxy simply starts cold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Thread-safe response cache with TTL expiry
pub struct ResponseCache {
    /// Cache entries keyed by action name
    entries: DashMap<String, CachedResponse>,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached response body with its expiry
struct CachedResponse {
    /// Serialized JSON body, returned verbatim on a hit
    body: String,
    /// Instant after which the entry is stale; `None` never expires
    expires_at: Option<Instant>,
}

impl CachedResponse {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResponseCache {
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached body if it exists and hasn't expired
    ///
    /// Expired entries are evicted on the way out and reported as a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                // A concurrent `set` may have refreshed the entry meanwhile
                if self.entries.remove_if(key, |_, e| e.is_expired()).is_some() {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.body.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store a body under `key`, replacing any previous entry
    ///
    /// A TTL too large to represent as an `Instant` means the entry never expires.
    pub fn set(&self, key: &str, body: String, ttl: Duration) {
        let entry = CachedResponse {
            body,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove the entry under `key`. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict expired entries (background maintenance)
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Expired entries removed
    pub evictions: u64,
    /// Entries removed by a mutating action
    pub invalidations: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
