//! Bounded TTL cache in front of the tenant store.
//!
//! The cache keeps the directory cheap on the hot path while leaving the
//! store as the source of truth:
//!
//! - **TTL-based expiration**, short enough that a suspended tenant stops
//!   being served quickly
//! - **Negative caching** so unknown hosts do not hammer the store
//! - **Bounded size**, evicting the entry nearest to expiry when full
//! - **Metrics** for monitoring cache performance
//!
//! Store failures are never cached.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fitos_tenancy::tenant::{CacheConfig, CacheLookup, Tenant, TenantCache};
//!
//! let cache = TenantCache::new(CacheConfig::new(100));
//! cache.insert("id:t1", Arc::new(Tenant::new("t1", "Acme")));
//! assert!(matches!(cache.lookup("id:t1"), CacheLookup::Hit(_)));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::error::TenancyResult;

use super::context::Tenant;

/// Configuration for the tenant cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Time-to-live for cached tenants.
    pub ttl: Duration,
    /// Time-to-live for negative entries (tenant not found).
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(30),
            negative_ttl: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Create a new config with the given max entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    /// Set the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the negative TTL.
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` marks a negative entry.
    tenant: Option<Arc<Tenant>>,
    expires_at: Instant,
}

impl CacheEntry {
    fn positive(tenant: Arc<Tenant>, ttl: Duration) -> Self {
        Self {
            tenant: Some(tenant),
            expires_at: Instant::now() + ttl,
        }
    }

    fn negative(ttl: Duration) -> Self {
        Self {
            tenant: None,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Negative cache hits.
    pub negative_hits: u64,
    /// Evictions due to capacity.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Current cache size.
    pub size: usize,
}

impl CacheMetrics {
    /// Calculate hit rate, counting negative hits as hits.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.negative_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicCacheMetrics {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, size: usize) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Found a live tenant.
    Hit(Arc<Tenant>),
    /// Found a live negative entry (tenant doesn't exist).
    NegativeHit,
    /// Entry not found or expired.
    Miss,
}

/// Tenant cache keyed by lookup key (`id:<id>` or `host:<host>`).
#[derive(Debug)]
pub struct TenantCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    metrics: AtomicCacheMetrics,
}

impl TenantCache {
    /// Create a new tenant cache with the given config.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            metrics: AtomicCacheMetrics::default(),
        }
    }

    /// Get the cache config.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a key.
    pub fn lookup(&self, key: &str) -> CacheLookup {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                AtomicCacheMetrics::bump(&self.metrics.expirations);
                AtomicCacheMetrics::bump(&self.metrics.misses);
                CacheLookup::Miss
            }
            Some(CacheEntry {
                tenant: Some(tenant),
                ..
            }) => {
                AtomicCacheMetrics::bump(&self.metrics.hits);
                CacheLookup::Hit(Arc::clone(tenant))
            }
            Some(_) => {
                AtomicCacheMetrics::bump(&self.metrics.negative_hits);
                CacheLookup::NegativeHit
            }
            None => {
                AtomicCacheMetrics::bump(&self.metrics.misses);
                CacheLookup::Miss
            }
        }
    }

    /// Cache a tenant under a key.
    pub fn insert(&self, key: impl Into<String>, tenant: Arc<Tenant>) {
        self.put(key.into(), CacheEntry::positive(tenant, self.config.ttl));
    }

    /// Cache the absence of a tenant under a key.
    pub fn insert_negative(&self, key: impl Into<String>) {
        self.put(key.into(), CacheEntry::negative(self.config.negative_ttl));
    }

    fn put(&self, key: String, entry: CacheEntry) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            self.evict_one(&mut entries);
        }
        entries.insert(key, entry);
    }

    /// Drop a single key.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every positive entry whose tenant matches the predicate.
    pub fn invalidate_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &Tenant) -> bool,
    {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| match &entry.tenant {
            Some(tenant) => !predicate(key, tenant),
            None => true,
        });
        before - entries.len()
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Get the current cache size.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache metrics.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot(self.len())
    }

    /// Drop expired entries, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let evicted = before - entries.len();
        self.metrics
            .expirations
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Get a key, fetching and caching it on a miss.
    ///
    /// `Ok(None)` results are cached negatively; errors are passed through
    /// without touching the cache.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> TenancyResult<Option<Arc<Tenant>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenancyResult<Option<Tenant>>>,
    {
        match self.lookup(key) {
            CacheLookup::Hit(tenant) => Ok(Some(tenant)),
            CacheLookup::NegativeHit => Ok(None),
            CacheLookup::Miss => match fetch().await? {
                Some(tenant) => {
                    let tenant = Arc::new(tenant);
                    self.insert(key, Arc::clone(&tenant));
                    Ok(Some(tenant))
                }
                None => {
                    self.insert_negative(key);
                    Ok(None)
                }
            },
        }
    }

    fn evict_one(&self, entries: &mut HashMap<String, CacheEntry>) {
        // Prefer anything already expired, otherwise the entry closest to expiry.
        let expired_key = entries
            .iter()
            .find(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone());

        if let Some(key) = expired_key {
            entries.remove(&key);
            AtomicCacheMetrics::bump(&self.metrics.expirations);
            return;
        }

        let oldest_key = entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest_key {
            entries.remove(&key);
            AtomicCacheMetrics::bump(&self.metrics.evictions);
        }
    }
}
