//! Tenant stores: the source of truth the directory reads from.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::TenancyResult;

use super::context::{Tenant, TenantId};

/// Read access to tenant records.
///
/// Implementations return `Ok(None)` when nothing matches and reserve `Err`
/// for failures of the store itself.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Exact lookup by id.
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>>;

    /// Lookup by an already normalised host name.
    ///
    /// A tenant whose custom domain equals `host` wins; otherwise the leading
    /// label of a host with at least three labels is matched against the
    /// tenants' subdomains (see [`subdomain_label`]).
    async fn find_by_host(&self, host: &str) -> TenancyResult<Option<Tenant>>;
}

#[async_trait]
impl<S: TenantStore + ?Sized> TenantStore for Arc<S> {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        (**self).find_by_id(id).await
    }

    async fn find_by_host(&self, host: &str) -> TenancyResult<Option<Tenant>> {
        (**self).find_by_host(host).await
    }
}

/// Normalise a `Host` header value: lowercase, no port, no trailing dot.
///
/// Returns `None` for values that cannot name a tenant.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let without_port = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal, `[::1]:8080`
        rest.split(']').next().unwrap_or(rest)
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    let host = without_port.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}

/// Leading DNS label of a host with at least three labels.
///
/// `acme.fitos.example` yields `acme`; `fitos.example` yields nothing so
/// that an apex domain never matches a tenant subdomain.
pub fn subdomain_label(host: &str) -> Option<&str> {
    let mut labels = host.split('.');
    let first = labels.next()?;
    if first.is_empty() || labels.count() < 2 {
        return None;
    }
    Some(first)
}

/// An in-memory tenant store.
///
/// Used for fixtures and tests, and as a seed-data store for single-node
/// deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantStore {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

impl StaticTenantStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given tenants.
    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let store = Self::new();
        for tenant in tenants {
            store.upsert(tenant);
        }
        store
    }

    /// Insert or replace a tenant.
    pub fn upsert(&self, tenant: Tenant) -> &Self {
        self.tenants.write().insert(tenant.id.clone(), tenant);
        self
    }

    /// Remove a tenant.
    pub fn remove(&self, id: &TenantId) -> Option<Tenant> {
        self.tenants.write().remove(id)
    }

    /// Check if a tenant is registered.
    pub fn contains(&self, id: &TenantId) -> bool {
        self.tenants.read().contains_key(id)
    }

    /// Get the number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TenantStore for StaticTenantStore {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_host(&self, host: &str) -> TenancyResult<Option<Tenant>> {
        let tenants = self.tenants.read();

        if let Some(tenant) = tenants
            .values()
            .find(|t| t.custom_domain.as_deref() == Some(host))
        {
            return Ok(Some(tenant.clone()));
        }

        Ok(subdomain_label(host).and_then(|label| {
            tenants
                .values()
                .find(|t| t.subdomain.as_deref() == Some(label))
                .cloned()
        }))
    }
}

/// Boxed future returned by [`DynamicTenantStore`] callbacks.
pub type StoreFuture = Pin<Box<dyn Future<Output = TenancyResult<Option<Tenant>>> + Send>>;

type LookupFn = Arc<dyn Fn(String) -> StoreFuture + Send + Sync>;

/// A store backed by two callbacks, for wiring in an external lookup.
pub struct DynamicTenantStore {
    by_id: LookupFn,
    by_host: LookupFn,
}

impl DynamicTenantStore {
    /// Create a store from id and host lookup callbacks.
    pub fn new<I, IF, H, HF>(by_id: I, by_host: H) -> Self
    where
        I: Fn(String) -> IF + Send + Sync + 'static,
        IF: Future<Output = TenancyResult<Option<Tenant>>> + Send + 'static,
        H: Fn(String) -> HF + Send + Sync + 'static,
        HF: Future<Output = TenancyResult<Option<Tenant>>> + Send + 'static,
    {
        Self {
            by_id: Arc::new(move |id| Box::pin(by_id(id))),
            by_host: Arc::new(move |host| Box::pin(by_host(host))),
        }
    }
}

impl fmt::Debug for DynamicTenantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicTenantStore").finish()
    }
}

#[async_trait]
impl TenantStore for DynamicTenantStore {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        (self.by_id)(id.as_str().to_string()).await
    }

    async fn find_by_host(&self, host: &str) -> TenancyResult<Option<Tenant>> {
        (self.by_host)(host.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenancyError;
    use pretty_assertions::assert_eq;

    fn store() -> StaticTenantStore {
        StaticTenantStore::with_tenants([
            Tenant::new("t1", "Acme").with_subdomain("acme"),
            Tenant::new("t2", "Bolt")
                .with_subdomain("bolt")
                .with_custom_domain("app.boltgym.com"),
            Tenant::new("t3", "Apex").with_subdomain("fitos"),
        ])
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("Acme.FitOS.example:8443").as_deref(),
            Some("acme.fitos.example")
        );
        assert_eq!(normalize_host("acme.fitos.example.").as_deref(), Some("acme.fitos.example"));
        assert_eq!(normalize_host("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(normalize_host("  "), None);
        assert_eq!(normalize_host(":80"), None);
    }

    #[test]
    fn test_subdomain_label() {
        assert_eq!(subdomain_label("acme.fitos.example"), Some("acme"));
        assert_eq!(subdomain_label("a.b.c.d"), Some("a"));
        assert_eq!(subdomain_label("fitos.example"), None);
        assert_eq!(subdomain_label("localhost"), None);
        assert_eq!(subdomain_label(".fitos.example"), None);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let store = store();
        let t = store.find_by_id(&TenantId::new("t1")).await.unwrap();
        assert_eq!(t.map(|t| t.name), Some("Acme".to_string()));
        assert!(store.find_by_id(&TenantId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_host() {
        let store = store();

        let by_sub = store.find_by_host("acme.fitos.example").await.unwrap();
        assert_eq!(by_sub.unwrap().id.as_str(), "t1");

        let by_domain = store.find_by_host("app.boltgym.com").await.unwrap();
        assert_eq!(by_domain.unwrap().id.as_str(), "t2");

        // Apex domain never matches the `fitos` subdomain.
        assert!(store.find_by_host("fitos.example").await.unwrap().is_none());
        assert!(store.find_by_host("zzz.fitos.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_domain_beats_subdomain() {
        let store = store();
        // The leading label `app` would match t4, but t2 owns the whole domain.
        store.upsert(Tenant::new("t4", "Shadow").with_subdomain("app"));
        let t = store.find_by_host("app.boltgym.com").await.unwrap();
        assert_eq!(t.unwrap().id.as_str(), "t2");
    }

    #[tokio::test]
    async fn test_dynamic_store() {
        let store = DynamicTenantStore::new(
            |id| async move {
                if id == "t1" {
                    Ok(Some(Tenant::new("t1", "Acme")))
                } else {
                    Ok(None)
                }
            },
            |_host| async { Err(TenancyError::directory_unavailable("timeout")) },
        );

        assert!(store.find_by_id(&TenantId::new("t1")).await.unwrap().is_some());
        assert!(store.find_by_id(&TenantId::new("t2")).await.unwrap().is_none());
        assert!(store.find_by_host("acme.fitos.example").await.is_err());
    }
}
