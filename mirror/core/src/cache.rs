//! Expiring cache with FIFO eviction
//!
//! One generic, bounded key/value store reused by every cacheable read path
//! (issue lists, pull requests, commit timelines, diffs). Each instance is
//! constructed for exactly one namespace and owned by the session that
//! created it; there is no process-wide default.
//!
//! # Design
//!
//! - **TTL**: an entry older than its TTL is never returned. Expiration is
//!   lazy: a stale entry is removed by the `get` that finds it.
//! - **Bounded**: after any `set`, the cache holds at most `max_entries`
//!   keys. Inserting a new key into a full cache evicts the single
//!   oldest-inserted entry (insertion order, not access order).
//! - **Namespaced keys**: every [`CacheKey`] starts with its namespace tag.
//!   A key from another namespace is a miss, never an error.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive expiry with a
//! paused clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A cache shared between the tasks serving one consumer
pub type SharedCache<V> = Arc<Mutex<ExpiringCache<V>>>;

// ============================================================================
// Keys
// ============================================================================

/// Deterministic composite key: `namespace:part:part...`
///
/// Parts are escaped so that `:` inside a part can never make two different
/// part lists produce the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    encoded: String,
    namespace_len: usize,
}

impl CacheKey {
    /// Start a key in a namespace
    pub fn new(namespace: &str) -> Self {
        let encoded = escape(namespace);
        Self {
            namespace_len: encoded.len(),
            encoded,
        }
    }

    /// Append an identifying field
    #[must_use]
    pub fn part(mut self, value: impl AsRef<str>) -> Self {
        self.encoded.push(':');
        self.encoded.push_str(&escape(value.as_ref()));
        self
    }

    /// The namespace tag, as encoded
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.encoded[..self.namespace_len]
    }

    /// Full encoded key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn escape(value: &str) -> String {
    if !value.contains(|c: char| c == ':' || c == '%') {
        return value.to_string();
    }
    value.replace('%', "%25").replace(':', "%3A")
}

// ============================================================================
// Configuration and Stats
// ============================================================================

/// Bounds for one cache instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of a returned entry
    pub ttl: Duration,
    /// Maximum number of distinct keys
    pub max_entries: usize,
}

impl CacheConfig {
    /// Create a config
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { ttl, max_entries }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 50,
        }
    }
}

/// Counters for monitoring cache effectiveness
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Stale entries removed on lookup
    pub expirations: u64,
    /// Entries evicted to make room
    pub evictions: u64,
    /// Operations rejected for a foreign namespace
    pub namespace_mismatches: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when there were none
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// A cached value and when it was inserted
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    /// Encoded key
    pub key: String,
    /// Cached value
    pub value: V,
    /// Insertion time
    pub inserted_at: Instant,
    seq: u64,
}

/// TTL- and size-bounded store for one namespace
#[derive(Debug)]
pub struct ExpiringCache<V> {
    namespace: String,
    config: CacheConfig,
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence number -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    stats: CacheStats,
}

impl<V> ExpiringCache<V> {
    /// Create a cache for one namespace
    ///
    /// A `max_entries` of zero is treated as one.
    pub fn new(namespace: &str, config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_entries: config.max_entries.max(1),
            ..config
        };
        Self {
            namespace: escape(namespace),
            config,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    /// Create a cache already wrapped for sharing
    pub fn shared(namespace: &str, config: CacheConfig) -> SharedCache<V> {
        Arc::new(Mutex::new(Self::new(namespace, config)))
    }

    /// Namespace this cache serves
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Bounds this cache enforces
    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Start a key in this cache's namespace
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey {
            encoded: self.namespace.clone(),
            namespace_len: self.namespace.len(),
        }
    }

    /// Look up a fresh value, removing it if it has expired
    pub fn get(&mut self, key: &CacheKey) -> Option<&V> {
        if !self.owns(key) {
            self.stats.misses += 1;
            return None;
        }

        let fresh = match self.entries.get(key.as_str()) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() < self.config.ttl,
        };

        if !fresh {
            self.remove_entry(key.as_str());
            self.stats.expirations += 1;
            self.stats.misses += 1;
            tracing::trace!(key = %key, "cache entry expired");
            return None;
        }

        self.stats.hits += 1;
        self.entries.get(key.as_str()).map(|e| &e.value)
    }

    /// Insert or overwrite a value
    ///
    /// Overwriting refreshes the entry's insertion time and position.
    pub fn set(&mut self, key: CacheKey, value: V) {
        if !self.owns(&key) {
            return;
        }

        let key = key.encoded;
        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.seq);
        } else if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }

    /// Remove a key, returning its value even if stale
    pub fn remove(&mut self, key: &CacheKey) -> Option<V> {
        self.remove_entry(key.as_str()).map(|e| e.value)
    }

    /// Number of stored entries, fresh or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn owns(&mut self, key: &CacheKey) -> bool {
        if key.namespace() == self.namespace {
            return true;
        }
        self.stats.namespace_mismatches += 1;
        tracing::warn!(
            cache = %self.namespace,
            key = %key,
            "key from foreign namespace ignored"
        );
        false
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn evict_oldest(&mut self) {
        // Any key in `order` without an entry is skipped, not fatal
        while let Some((_, key)) = self.order.pop_first() {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions += 1;
                tracing::trace!(cache = %self.namespace, key = %key, "evicted oldest entry");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize) -> ExpiringCache<u32> {
        ExpiringCache::new("issues", CacheConfig::new(Duration::from_secs(60), max))
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new("issues").part("acme/repo").part(id)
    }

    #[test]
    fn test_key_format() {
        assert_eq!(key("open").as_str(), "issues:acme/repo:open");
        assert_eq!(key("open").namespace(), "issues");
    }

    #[test]
    fn test_key_parts_cannot_collide() {
        let a = CacheKey::new("diff").part("a:b").part("c");
        let b = CacheKey::new("diff").part("a").part("b:c");
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_set() {
        let mut cache = cache(10);
        cache.set(key("open"), 7);
        assert_eq!(cache.get(&key("open")), Some(&7));
        assert_eq!(cache.get(&key("closed")), None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let mut cache = cache(10);
        cache.set(key("open"), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key("open")), Some(&1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key("open")), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_eviction_of_oldest_only() {
        let mut cache = cache(3);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("c"), 3);

        // Reading "a" must not protect it: eviction is by insertion order
        assert_eq!(cache.get(&key("a")), Some(&1));
        cache.set(key("d"), 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(&2));
        assert_eq!(cache.get(&key("c")), Some(&3));
        assert_eq!(cache.get(&key("d")), Some(&4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict_and_refreshes_position() {
        let mut cache = cache(2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("a"), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);

        cache.set(key("c"), 3);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some(&10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_ttl() {
        let mut cache = cache(2);
        cache.set(key("a"), 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.set(key("a"), 2);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get(&key("a")), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_namespace_is_a_miss() {
        let mut cache = cache(2);
        let foreign = CacheKey::new("pulls").part("acme/repo").part("open");
        cache.set(foreign.clone(), 5);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&foreign), None);
        assert_eq!(cache.stats().namespace_mismatches, 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: ExpiringCache<u8> =
            ExpiringCache::new("diff", CacheConfig::new(Duration::from_secs(1), 0));
        assert_eq!(cache.config().max_entries, 1);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
