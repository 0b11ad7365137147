//! Dedicated per-tenant pools for database-level tenants.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::TenancyResult;

use super::config::ProvisionConfig;
use super::context::{Tenant, TenantId};
use super::pool::{EntryState, ProvisionStats, ProvisioningCache, Retirement, wait_all};
use super::provider::{Connector, HandleProvider, TenantHandle, close_fn};
use super::strategy::{ProviderKind, validate_tenant_id};

/// Maintains one dedicated pool per database-level tenant.
///
/// Pools are opened lazily. When many requests arrive for a tenant whose
/// pool does not exist yet, exactly one of them opens it and the rest wait
/// for that result, success or failure.
///
/// At most [`ProvisionConfig::max_entries`] pools are open at once. When the
/// cap is reached the least recently used idle pool is closed to make room;
/// if every pool is in use the request fails with the retryable
/// [`CapacityExceeded`](crate::ErrorCode::CapacityExceeded) error.
pub struct ConnectionPoolManager<C: Connector> {
    connector: Arc<C>,
    pools: ProvisioningCache<TenantId, C::Handle>,
}

impl<C: Connector> ConnectionPoolManager<C> {
    /// Create a manager.
    pub fn new(connector: Arc<C>, config: ProvisionConfig) -> Self {
        let pools = ProvisioningCache::new("pool", config, close_fn(&connector));
        Self { connector, pools }
    }

    /// Lease the tenant's dedicated pool, opening it if needed.
    ///
    /// Without an explicit `database_url` the database name is derived from
    /// the id, so the id must pass [`validate_tenant_id`].
    pub async fn get_connection(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<C::Handle>> {
        if tenant.database_url.is_none() {
            validate_tenant_id(&tenant.id)?;
        }
        let connector = Arc::clone(&self.connector);
        let owned = Arc::new(tenant.clone());

        let (client, lease) = self
            .pools
            .get_or_provision(&tenant.id, move || {
                let connector = Arc::clone(&connector);
                let tenant = Arc::clone(&owned);
                async move { connector.connect_dedicated(&tenant).await }
            })
            .await
            .map_err(|e| e.with_tenant(&tenant.id))?;

        debug!(tenant_id = %tenant.id, "Leased dedicated pool");
        Ok(TenantHandle::dedicated(client, lease))
    }

    /// Force-close a tenant's pool once its leases drain.
    pub fn evict(&self, tenant_id: &TenantId) -> Option<Retirement> {
        let retirement = self.pools.evict(tenant_id);
        if retirement.is_some() {
            info!(tenant_id = %tenant_id, "Closing dedicated pool");
        }
        retirement
    }

    /// Close pools idle past the threshold.
    pub fn sweep_idle(&self) -> Vec<Retirement> {
        self.pools.sweep_idle()
    }

    /// State of a tenant's pool.
    pub fn state(&self, tenant_id: &TenantId) -> Option<EntryState> {
        self.pools.state(tenant_id)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ProvisionStats {
        self.pools.stats()
    }

    /// Number of pools, including ones still opening.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Check if no pool is open.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[async_trait]
impl<C: Connector> HandleProvider<C::Handle> for ConnectionPoolManager<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dedicated
    }

    async fn provide(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<C::Handle>> {
        self.get_connection(tenant).await
    }

    fn release(&self, tenant_id: &TenantId) -> Option<Retirement> {
        self.evict(tenant_id)
    }

    async fn sweep_idle(&self) -> usize {
        wait_all(ConnectionPoolManager::sweep_idle(self)).await
    }

    async fn shutdown(&self) {
        self.pools.shutdown().await;
    }
}
