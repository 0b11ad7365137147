//! The process-wide handle for row-level tenants.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::TenancyResult;

use super::config::ProvisionConfig;
use super::context::Tenant;
use super::pool::{EntryState, ProvisionStats, ProvisioningCache};
use super::provider::{Connector, HandleProvider, TenantHandle, close_fn};
use super::strategy::ProviderKind;

/// Cache key of the one shared handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SharedKey;

impl fmt::Display for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("shared")
    }
}

/// Lazily opens one handle and hands clones of it to every row-level tenant.
///
/// The handle is opened at most once, even under concurrent first use, on a
/// background task bounded by [`ProvisionConfig::provision_timeout`]. If
/// opening fails or times out, nothing is cached and the next caller tries
/// again. After [`shutdown`](HandleProvider::shutdown) every request is
/// refused with [`HandleClosed`](crate::ErrorCode::HandleClosed).
///
/// Nothing here isolates tenants: every query issued through the handle must
/// carry a tenant predicate, see [`RowFilter`](super::strategy::RowFilter).
pub struct SharedHandleProvider<C: Connector> {
    connector: Arc<C>,
    cache: ProvisioningCache<SharedKey, C::Handle>,
}

impl<C: Connector> SharedHandleProvider<C> {
    /// Create a provider with [`ProvisionConfig::shared_defaults`].
    pub fn new(connector: Arc<C>) -> Self {
        Self::with_config(connector, ProvisionConfig::shared_defaults())
    }

    /// Create a provider; only the provisioning deadline of `config` is used.
    pub fn with_config(connector: Arc<C>, config: ProvisionConfig) -> Self {
        let config = ProvisionConfig {
            max_entries: 1,
            ..config
        };
        let cache = ProvisioningCache::new("shared", config, close_fn(&connector));
        Self { connector, cache }
    }

    /// Get the shared handle, opening it on first use.
    pub async fn get(&self) -> TenancyResult<C::Handle> {
        let connector = Arc::clone(&self.connector);
        let (handle, lease) = self
            .cache
            .get_or_provision(&SharedKey, move || {
                let connector = Arc::clone(&connector);
                async move {
                    debug!("Opening shared handle");
                    let handle = connector.connect_shared().await?;
                    info!("Shared handle ready");
                    Ok(handle)
                }
            })
            .await?;
        // Row-level requests do not pin the handle; it lives until shutdown.
        drop(lease);
        Ok(handle)
    }

    /// Whether the handle has been opened.
    pub fn is_initialized(&self) -> bool {
        self.cache.state(&SharedKey) == Some(EntryState::Ready)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ProvisionStats {
        self.cache.stats()
    }
}

#[async_trait]
impl<C: Connector> HandleProvider<C::Handle> for SharedHandleProvider<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Shared
    }

    async fn provide(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<C::Handle>> {
        debug!(tenant_id = %tenant.id, "Serving shared handle");
        self.get()
            .await
            .map(TenantHandle::shared)
            .map_err(|e| e.with_tenant(&tenant.id))
    }

    async fn shutdown(&self) {
        if self.cache.shutdown().await > 0 {
            info!("Shared handle closed");
        }
    }
}
