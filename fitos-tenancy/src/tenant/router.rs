//! The assembled routing layer.
//!
//! [`TenantRouter`] owns the directory, the three providers and the binder.
//! It is constructed once at startup and handed to the transport layer;
//! there is no global instance.
//!
//! ```rust,ignore
//! let router = TenantRouter::builder(connector, store)
//!     .pool_config(ProvisionConfig::builder().max_entries(32).build()?)
//!     .build()?;
//! let sweeper = router.spawn_sweeper(Duration::from_secs(30));
//!
//! // serve requests with router.binder()
//!
//! sweeper.stop().await;
//! router.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::RoutingConfig;
use crate::error::TenancyResult;

use super::binder::TenantBinder;
use super::cache::CacheConfig;
use super::config::{BinderConfig, ProvisionConfig};
use super::context::TenantId;
use super::directory::TenantDirectory;
use super::manager::ConnectionPoolManager;
use super::pool::Retirement;
use super::provider::{Connector, ProviderTable};
use super::resolver::TenantStore;
use super::schema::SchemaHandleFactory;
use super::shared::SharedHandleProvider;
use super::sweeper::{SweepReport, SweeperHandle, spawn_sweeper, sweep_once};

/// Directory, providers and binder wired together.
pub struct TenantRouter<C: Connector> {
    shared: Arc<SharedHandleProvider<C>>,
    schemas: Arc<SchemaHandleFactory<C>>,
    pools: Arc<ConnectionPoolManager<C>>,
    binder: TenantBinder<C::Handle>,
}

impl<C: Connector> TenantRouter<C> {
    /// Start building a router.
    pub fn builder(connector: Arc<C>, store: Arc<dyn TenantStore>) -> TenantRouterBuilder<C> {
        TenantRouterBuilder::new(connector, store)
    }

    /// Build a router from a loaded configuration file.
    pub fn from_config(
        config: &RoutingConfig,
        connector: Arc<C>,
        store: Arc<dyn TenantStore>,
    ) -> TenancyResult<Self> {
        Self::builder(connector, store)
            .cache_config(config.cache_config())
            .shared_config(config.shared_config()?)
            .schema_config(config.schema_config()?)
            .pool_config(config.pool_config()?)
            .binder_config(config.binder_config())
            .build()
    }

    /// The binder to run for each request.
    pub fn binder(&self) -> &TenantBinder<C::Handle> {
        &self.binder
    }

    /// The tenant directory.
    pub fn directory(&self) -> &Arc<TenantDirectory> {
        self.binder.directory()
    }

    /// The provider table.
    pub fn providers(&self) -> &Arc<ProviderTable<C::Handle>> {
        self.binder.providers()
    }

    /// The row-level provider.
    pub fn shared(&self) -> &Arc<SharedHandleProvider<C>> {
        &self.shared
    }

    /// The schema-level provider.
    pub fn schemas(&self) -> &Arc<SchemaHandleFactory<C>> {
        &self.schemas
    }

    /// The database-level provider.
    pub fn pools(&self) -> &Arc<ConnectionPoolManager<C>> {
        &self.pools
    }

    /// Forget a tenant's cached record and stop serving its cached handles.
    ///
    /// Call this when a tenant is suspended or its record changes. Returns
    /// without waiting: handles still in use are closed once their requests
    /// finish. Await the returned retirements with [`wait_all`](super::wait_all) to observe
    /// the closes, or drop them.
    pub fn invalidate_tenant(&self, tenant_id: &TenantId) -> Vec<Retirement> {
        self.directory().invalidate(tenant_id);
        let retiring = self.providers().release(tenant_id);
        info!(tenant_id = %tenant_id, released = retiring.len(), "Invalidated tenant");
        retiring
    }

    /// Run one idle sweep now.
    pub async fn sweep_idle(&self) -> SweepReport {
        sweep_once(self.providers(), self.directory()).await
    }

    /// Spawn the background idle sweeper.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        spawn_sweeper(Arc::clone(self.providers()), Arc::clone(self.directory()), every)
    }

    /// Close every handle and drop cached lookups.
    ///
    /// Stop the sweeper first. Requests still holding handles keep them
    /// until they finish; the handles are closed afterwards.
    pub async fn shutdown(&self) {
        info!("Shutting down tenant router");
        self.providers().shutdown().await;
        self.directory().clear();
    }
}

impl<C: Connector> std::fmt::Debug for TenantRouter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRouter")
            .field("binder", &self.binder)
            .field("schemas", &self.schemas.len())
            .field("pools", &self.pools.len())
            .finish()
    }
}

/// Builder for [`TenantRouter`].
pub struct TenantRouterBuilder<C: Connector> {
    connector: Arc<C>,
    store: Arc<dyn TenantStore>,
    cache: CacheConfig,
    shared: ProvisionConfig,
    schema: ProvisionConfig,
    pool: ProvisionConfig,
    binder: BinderConfig,
}

impl<C: Connector> TenantRouterBuilder<C> {
    /// Create a builder with default settings.
    pub fn new(connector: Arc<C>, store: Arc<dyn TenantStore>) -> Self {
        Self {
            connector,
            store,
            cache: CacheConfig::default(),
            shared: ProvisionConfig::shared_defaults(),
            schema: ProvisionConfig::schema_defaults(),
            pool: ProvisionConfig::pool_defaults(),
            binder: BinderConfig::default(),
        }
    }

    /// Set the directory cache settings.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the deadline for opening the shared handle.
    pub fn shared_config(mut self, config: ProvisionConfig) -> Self {
        self.shared = config;
        self
    }

    /// Set the schema handle limits.
    pub fn schema_config(mut self, config: ProvisionConfig) -> Self {
        self.schema = config;
        self
    }

    /// Set the dedicated pool limits.
    pub fn pool_config(mut self, config: ProvisionConfig) -> Self {
        self.pool = config;
        self
    }

    /// Set the binder settings.
    pub fn binder_config(mut self, config: BinderConfig) -> Self {
        self.binder = config;
        self
    }

    /// Build the router.
    pub fn build(self) -> TenancyResult<TenantRouter<C>> {
        self.shared.validate()?;
        self.schema.validate()?;
        self.pool.validate()?;

        let shared = Arc::new(SharedHandleProvider::with_config(
            Arc::clone(&self.connector),
            self.shared,
        ));
        let schemas = Arc::new(SchemaHandleFactory::new(Arc::clone(&self.connector), self.schema));
        let pools = Arc::new(ConnectionPoolManager::new(Arc::clone(&self.connector), self.pool));

        let providers = ProviderTable::new(shared.clone(), schemas.clone(), pools.clone())?;
        let directory = TenantDirectory::new(self.store, self.cache);
        let binder = TenantBinder::new(Arc::new(directory), Arc::new(providers), self.binder);

        Ok(TenantRouter {
            shared,
            schemas,
            pools,
            binder,
        })
    }
}
