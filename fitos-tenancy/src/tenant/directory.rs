//! Cached tenant lookups by id and by host.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ErrorCode, TenancyError, TenancyResult};

use super::cache::{CacheConfig, CacheMetrics, TenantCache};
use super::context::{Tenant, TenantId};
use super::resolver::{TenantStore, normalize_host};

fn id_key(id: &TenantId) -> String {
    format!("id:{}", id)
}

fn host_key(host: &str) -> String {
    format!("host:{}", host)
}

/// Read-only view of the tenant store with a short-lived cache in front.
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    cache: TenantCache,
}

impl TenantDirectory {
    /// Create a directory over a store.
    pub fn new(store: Arc<dyn TenantStore>, config: CacheConfig) -> Self {
        Self {
            store,
            cache: TenantCache::new(config),
        }
    }

    /// Exact lookup by tenant id.
    pub async fn resolve_by_id(&self, id: &TenantId) -> TenancyResult<Option<Arc<Tenant>>> {
        let store = Arc::clone(&self.store);
        self.cache
            .get_or_fetch(&id_key(id), || async move {
                store.find_by_id(id).await.map_err(unavailable)
            })
            .await
    }

    /// Lookup by the raw `Host` header value.
    pub async fn resolve_by_host(&self, raw_host: &str) -> TenancyResult<Option<Arc<Tenant>>> {
        let Some(host) = normalize_host(raw_host) else {
            debug!(host = raw_host, "Host cannot name a tenant");
            return Ok(None);
        };

        let store = Arc::clone(&self.store);
        let lookup = host.clone();
        self.cache
            .get_or_fetch(&host_key(&host), || async move {
                store.find_by_host(&lookup).await.map_err(unavailable)
            })
            .await
    }

    /// Drop every cached entry referring to a tenant.
    pub fn invalidate(&self, id: &TenantId) {
        self.cache.invalidate(&id_key(id));
        let removed = self.cache.invalidate_if(|_, t| &t.id == id);
        debug!(tenant_id = %id, removed, "Invalidated tenant cache entries");
    }

    /// Drop the cached entry for a host.
    pub fn invalidate_host(&self, raw_host: &str) {
        if let Some(host) = normalize_host(raw_host) {
            self.cache.invalidate(&host_key(&host));
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Drop expired cache entries.
    pub fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    /// Cache metrics.
    pub fn metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }
}

impl std::fmt::Debug for TenantDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantDirectory")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

// A store failure must never read as "not found".
fn unavailable(err: TenancyError) -> TenancyError {
    if err.code == ErrorCode::DirectoryUnavailable {
        return err;
    }
    warn!(error = %err, "Tenant store lookup failed");
    TenancyError {
        code: ErrorCode::DirectoryUnavailable,
        ..err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::resolver::{DynamicTenantStore, StaticTenantStore};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn directory(store: StaticTenantStore) -> TenantDirectory {
        TenantDirectory::new(Arc::new(store), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_resolve_by_host_normalises() {
        let dir = directory(StaticTenantStore::with_tenants([
            Tenant::new("t2", "Acme").with_subdomain("acme"),
        ]));

        let t = dir.resolve_by_host("ACME.fitos.example:443").await.unwrap();
        assert_eq!(t.unwrap().id.as_str(), "t2");
        assert!(dir.resolve_by_host("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookups_are_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = DynamicTenantStore::new(
            move |id| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Some(Tenant::new(id, "Acme"))) }
            },
            |_| async { Ok(None) },
        );
        let dir = TenantDirectory::new(Arc::new(store), CacheConfig::default());
        let id = TenantId::new("t1");

        dir.resolve_by_id(&id).await.unwrap();
        dir.resolve_by_id(&id).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        dir.invalidate(&id);
        dir.resolve_by_id(&id).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = DynamicTenantStore::new(
            |_| async { Err(TenancyError::internal("socket closed")) },
            |_| async { Ok(None) },
        );
        let dir = TenantDirectory::new(Arc::new(store), CacheConfig::default());

        let err = dir.resolve_by_id(&TenantId::new("t1")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DirectoryUnavailable);
        assert_eq!(dir.metrics().size, 0);
    }

    #[tokio::test]
    async fn test_invalidate_drops_host_entries() {
        let store = StaticTenantStore::with_tenants([
            Tenant::new("t1", "Acme").with_subdomain("acme"),
        ]);
        let dir = directory(store.clone());

        dir.resolve_by_host("acme.fitos.example").await.unwrap();
        dir.resolve_by_id(&TenantId::new("t1")).await.unwrap();
        assert_eq!(dir.metrics().size, 2);

        dir.invalidate(&TenantId::new("t1"));
        assert_eq!(dir.metrics().size, 0);
    }
}
