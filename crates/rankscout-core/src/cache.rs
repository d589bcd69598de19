//! Tiered in-memory cache for provider payloads.
//!
//! Every entry belongs to a [`Volatility`] class whose TTL comes from the
//! store's [`TtlTable`]. Entries are never served past expiry; an expired
//! entry is evicted on the read that discovers it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Reads between opportunistic sweeps of expired entries.
const SWEEP_EVERY_READS: u64 = 256;

/// Defines the behavior of the in-memory cache for a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

/// How fast the underlying data changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Category trees, titles, identifiers.
    Stable,
    /// Current offers and prices.
    Volatile,
    /// Rank-driven listings (bulk queries, bestseller lists).
    SemiVolatile,
}

/// TTL per volatility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTable {
    pub stable: Duration,
    pub volatile: Duration,
    pub semi_volatile: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            stable: Duration::from_secs(24 * 60 * 60),
            volatile: Duration::from_secs(15 * 60),
            semi_volatile: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl TtlTable {
    pub const fn ttl(&self, class: Volatility) -> Duration {
        match class {
            Volatility::Stable => self.stable,
            Volatility::Volatile => self.volatile,
            Volatility::SemiVolatile => self.semi_volatile,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    ttls: TtlTable,
}

impl CacheInner {
    fn sweep(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.expires_at > now);
    }
}

/// Thread-safe tiered cache; clones share the same storage.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(TtlTable::default())
    }
}

impl CacheStore {
    pub fn new(ttls: TtlTable) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttls,
            })),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a cached payload if it exists and hasn't expired.
    ///
    /// An expired entry counts as a miss and is removed.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let reads = self.hits.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed);

        {
            let store = self.inner.read().await;
            match store.map.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.body.clone());
                }
                None if reads % SWEEP_EVERY_READS != 0 => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                _ => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut store = self.inner.write().await;
        if store
            .map
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            store.map.remove(key);
        }
        if reads % SWEEP_EVERY_READS == 0 {
            store.sweep(now);
        }
        None
    }

    /// Store a payload under `class`, replacing any previous entry.
    pub async fn set(&self, key: impl Into<String>, body: impl Into<String>, class: Volatility) {
        let mut store = self.inner.write().await;
        let ttl = store.ttls.ttl(class);
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            body: body.into(),
            expires_at: Instant::now() + ttl,
        };
        store.map.insert(key.into(), entry);
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.inner.read().await;
        CacheStats {
            entries: store.map.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Remove expired entries from the cache.
    pub async fn clear_expired(&self) {
        let mut store = self.inner.write().await;
        store.sweep(Instant::now());
    }

    /// Clear all entries from the cache.
    pub async fn clear(&self) {
        let mut store = self.inner.write().await;
        store.map.clear();
    }
}

/// Deterministic cache key: endpoint followed by parameters sorted by name.
pub fn cache_key<'a, I>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs = params.into_iter().collect::<Vec<_>>();
    pairs.sort_unstable();

    let mut key = String::from(endpoint);
    for (index, (name, value)) in pairs.into_iter().enumerate() {
        key.push(if index == 0 { '?' } else { '&' });
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_ttls() -> TtlTable {
        TtlTable {
            stable: Duration::from_secs(600),
            volatile: Duration::from_secs(10),
            semi_volatile: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn set_then_get_returns_identical_payload() {
        let cache = CacheStore::new(short_ttls());
        let body = r#"{"products":[{"asin":"B000000001"}]}"#;

        assert!(cache.get("product?asin=B000000001").await.is_none());
        cache
            .set("product?asin=B000000001", body, Volatility::Volatile)
            .await;

        assert_eq!(
            cache.get("product?asin=B000000001").await.as_deref(),
            Some(body)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_by_class() {
        let cache = CacheStore::new(short_ttls());
        cache.set("pricing", "p", Volatility::Volatile).await;
        cache.set("rank", "r", Volatility::SemiVolatile).await;
        cache.set("meta", "m", Volatility::Stable).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("pricing").await.is_none());
        assert_eq!(cache.get("rank").await.as_deref(), Some("r"));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.get("rank").await.is_none());
        assert_eq!(cache.get("meta").await.as_deref(), Some("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_evicted_on_read() {
        let cache = CacheStore::new(short_ttls());
        cache.set("pricing", "p", Volatility::Volatile).await;
        assert_eq!(cache.stats().await.entries, 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("pricing").await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = CacheStore::new(short_ttls());
        cache.set("k", "v", Volatility::Stable).await;

        let _ = cache.get("k").await;
        let _ = cache.get("k").await;
        let _ = cache.get("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn zero_ttl_class_is_not_stored() {
        let cache = CacheStore::new(TtlTable {
            volatile: Duration::ZERO,
            ..short_ttls()
        });
        cache.set("k", "v", Volatility::Volatile).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = CacheStore::new(short_ttls());
        cache.set("a", "1", Volatility::Stable).await;
        cache.set("b", "2", Volatility::Volatile).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[test]
    fn cache_key_sorts_parameters() {
        let first = cache_key("product", [("stats", "90"), ("asin", "B000000001")]);
        let second = cache_key("product", [("asin", "B000000001"), ("stats", "90")]);
        assert_eq!(first, second);
        assert_eq!(first, "product?asin=B000000001&stats=90");
        assert_eq!(cache_key("token", Vec::<(&str, &str)>::new()), "token");
    }

    #[test]
    fn cache_mode_default_is_use() {
        assert_eq!(CacheMode::default(), CacheMode::Use);
    }
}
