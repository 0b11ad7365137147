//! Schema-bound handles for schema-level tenants.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TenancyResult;

use super::config::ProvisionConfig;
use super::context::{Tenant, TenantId};
use super::pool::{EntryState, ProvisionStats, ProvisioningCache, Retirement, wait_all};
use super::provider::{Connector, HandleProvider, TenantHandle, close_fn};
use super::strategy::{ProviderKind, SchemaName};

/// Caches one schema-bound handle per tenant schema.
///
/// Handles are created on first use, shared by every request for the same
/// schema, and closed by the idle sweep or on eviction once their leases
/// drain. The number of open handles is capped by
/// [`ProvisionConfig::max_entries`].
pub struct SchemaHandleFactory<C: Connector> {
    connector: Arc<C>,
    cache: ProvisioningCache<SchemaName, C::Handle>,
}

impl<C: Connector> SchemaHandleFactory<C> {
    /// Create a factory.
    pub fn new(connector: Arc<C>, config: ProvisionConfig) -> Self {
        let cache = ProvisioningCache::new("schema", config, close_fn(&connector));
        Self { connector, cache }
    }

    /// Lease the handle bound to the tenant's schema.
    pub async fn get_handle(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<C::Handle>> {
        let schema = SchemaName::derive(&tenant.id)?;
        let connector = Arc::clone(&self.connector);
        let tenant_for_create = Arc::new(tenant.clone());
        let schema_for_create = schema.clone();

        let (client, lease) = self
            .cache
            .get_or_provision(&schema, move || {
                let connector = Arc::clone(&connector);
                let tenant = Arc::clone(&tenant_for_create);
                let schema = schema_for_create.clone();
                async move { connector.connect_schema(&tenant, &schema).await }
            })
            .await
            .map_err(|e| e.with_tenant(&tenant.id))?;

        debug!(tenant_id = %tenant.id, schema = %schema, "Leased schema handle");
        Ok(TenantHandle::schema(client, schema, lease))
    }

    /// Force out the handle for a tenant's schema.
    pub fn evict(&self, tenant_id: &TenantId) -> Option<Retirement> {
        let schema = SchemaName::derive(tenant_id).ok()?;
        self.cache.evict(&schema)
    }

    /// Close handles idle past the threshold.
    pub fn sweep_idle(&self) -> Vec<Retirement> {
        self.cache.sweep_idle()
    }

    /// State of a schema's entry.
    pub fn state(&self, schema: &SchemaName) -> Option<EntryState> {
        self.cache.state(schema)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ProvisionStats {
        self.cache.stats()
    }

    /// Number of cached handles, including ones still provisioning.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl<C: Connector> HandleProvider<C::Handle> for SchemaHandleFactory<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Schema
    }

    async fn provide(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<C::Handle>> {
        self.get_handle(tenant).await
    }

    fn release(&self, tenant_id: &TenantId) -> Option<Retirement> {
        self.evict(tenant_id)
    }

    async fn sweep_idle(&self) -> usize {
        wait_all(SchemaHandleFactory::sweep_idle(self)).await
    }

    async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}
