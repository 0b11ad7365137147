//! The seams between routing and the database driver.
//!
//! A [`Connector`] knows how to open the three kinds of handle. A
//! [`HandleProvider`] decides when to open them and how long to keep them.
//! The [`ProviderTable`] maps each [`ProviderKind`] to its provider once at
//! startup so that request handling is a plain table lookup.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{TenancyError, TenancyResult};

use super::context::{Tenant, TenantId};
use super::pool::{CloseFn, Lease, Retirement};
use super::strategy::{ProviderKind, SchemaName};

/// Opens database handles for the providers.
///
/// Handles must be cheap to clone and safe to share between tasks; a pool
/// handle is the typical choice.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The handle type downstream code receives.
    type Handle: Clone + Send + Sync + 'static;

    /// Open the process-wide handle used for row-level tenants.
    async fn connect_shared(&self) -> TenancyResult<Self::Handle>;

    /// Open a handle whose every operation runs inside `schema`.
    async fn connect_schema(
        &self,
        tenant: &Tenant,
        schema: &SchemaName,
    ) -> TenancyResult<Self::Handle>;

    /// Open a dedicated pool for a database-level tenant.
    async fn connect_dedicated(&self, tenant: &Tenant) -> TenancyResult<Self::Handle>;

    /// Release a handle that has been evicted and drained.
    async fn close(&self, _handle: Self::Handle) {}
}

/// Turn a connector's `close` into a cache close callback.
pub fn close_fn<C: Connector>(connector: &Arc<C>) -> CloseFn<C::Handle> {
    let connector = Arc::clone(connector);
    Arc::new(move |handle: C::Handle| {
        let connector = Arc::clone(&connector);
        async move { connector.close(handle).await }.boxed()
    })
}

/// A database handle scoped to one tenant.
///
/// Derefs to the driver handle. Holding it keeps the underlying cached entry
/// from being closed.
pub struct TenantHandle<H> {
    kind: ProviderKind,
    client: H,
    schema: Option<SchemaName>,
    lease: Option<Lease>,
}

impl<H> TenantHandle<H> {
    /// The shared row-level handle.
    pub fn shared(client: H) -> Self {
        Self {
            kind: ProviderKind::Shared,
            client,
            schema: None,
            lease: None,
        }
    }

    /// A schema-bound handle.
    pub fn schema(client: H, schema: SchemaName, lease: Lease) -> Self {
        Self {
            kind: ProviderKind::Schema,
            client,
            schema: Some(schema),
            lease: Some(lease),
        }
    }

    /// A dedicated per-tenant handle.
    pub fn dedicated(client: H, lease: Lease) -> Self {
        Self {
            kind: ProviderKind::Dedicated,
            client,
            schema: None,
            lease: Some(lease),
        }
    }

    /// Which provider produced this handle.
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// The driver handle.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// The schema the handle is bound to, for schema-level tenants.
    pub fn schema_name(&self) -> Option<&SchemaName> {
        self.schema.as_ref()
    }

    /// Whether the handle pins a cached entry.
    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }
}

impl<H: Clone> Clone for TenantHandle<H> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            client: self.client.clone(),
            schema: self.schema.clone(),
            lease: self.lease.clone(),
        }
    }
}

impl<H> Deref for TenantHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.client
    }
}

impl<H: fmt::Debug> fmt::Debug for TenantHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("kind", &self.kind)
            .field("client", &self.client)
            .field("schema", &self.schema)
            .field("leased", &self.lease.is_some())
            .finish()
    }
}

/// Hands out tenant handles for one isolation strategy.
#[async_trait]
pub trait HandleProvider<H>: Send + Sync {
    /// The kind this provider serves.
    fn kind(&self) -> ProviderKind;

    /// Return a handle for an active tenant.
    async fn provide(&self, tenant: &Tenant) -> TenancyResult<TenantHandle<H>>;

    /// Stop serving anything cached for the tenant.
    ///
    /// Returns at once; the handle is closed in the background after its
    /// last lease drops.
    fn release(&self, _tenant_id: &TenantId) -> Option<Retirement> {
        None
    }

    /// Close cached handles idle past the threshold.
    async fn sweep_idle(&self) -> usize {
        0
    }

    /// Close everything.
    async fn shutdown(&self) {}
}

/// Dispatch table from [`ProviderKind`] to provider, built once at startup.
pub struct ProviderTable<H> {
    providers: [Arc<dyn HandleProvider<H>>; 3],
}

impl<H: Send + Sync + 'static> ProviderTable<H> {
    /// Build the table, checking every provider sits in the right slot.
    pub fn new(
        shared: Arc<dyn HandleProvider<H>>,
        schema: Arc<dyn HandleProvider<H>>,
        dedicated: Arc<dyn HandleProvider<H>>,
    ) -> TenancyResult<Self> {
        let providers = [shared, schema, dedicated];
        for (expected, provider) in ProviderKind::ALL.iter().zip(providers.iter()) {
            if provider.kind() != *expected {
                return Err(TenancyError::config(format!(
                    "provider for '{}' registered in the '{}' slot",
                    provider.kind(),
                    expected
                )));
            }
        }
        Ok(Self { providers })
    }

    /// The provider for a kind.
    pub fn get(&self, kind: ProviderKind) -> &Arc<dyn HandleProvider<H>> {
        &self.providers[kind.index()]
    }

    /// Obtain a handle for a tenant from the provider of the given kind.
    pub async fn provide(
        &self,
        kind: ProviderKind,
        tenant: &Tenant,
    ) -> TenancyResult<TenantHandle<H>> {
        self.get(kind).provide(tenant).await
    }

    /// Ask every provider to stop serving what it holds for a tenant.
    ///
    /// Never waits for in-flight requests. Await the returned retirements
    /// with [`wait_all`](super::pool::wait_all) to know when the handles are
    /// closed, or drop them to let the closes finish in the background.
    pub fn release(&self, tenant_id: &TenantId) -> Vec<Retirement> {
        self.providers
            .iter()
            .filter_map(|provider| provider.release(tenant_id))
            .collect()
    }

    /// Run the idle sweep on every provider.
    pub async fn sweep_idle(&self) -> usize {
        let mut closed = 0;
        for provider in &self.providers {
            closed += provider.sweep_idle().await;
        }
        closed
    }

    /// Shut every provider down.
    pub async fn shutdown(&self) {
        for provider in &self.providers {
            provider.shutdown().await;
        }
    }
}

impl<H> fmt::Debug for ProviderTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.kind()))
            .finish()
    }
}
