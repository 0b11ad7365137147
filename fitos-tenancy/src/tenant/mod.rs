//! Tenant-aware routing of requests to database handles.
//!
//! Every request goes through the same pipeline:
//!
//! 1. **Resolve** the tenant from an explicit id or from the `Host` header
//!    ([`TenantDirectory`], cached in front of a [`TenantStore`]).
//! 2. **Gate** on status: only active tenants are served ([`StatusGate`]).
//! 3. **Classify** the tenant's storage strategy ([`classify`]).
//! 4. **Provision** a handle from the matching provider:
//!
//! | Strategy         | Provider                   | Handle                                 |
//! |------------------|----------------------------|----------------------------------------|
//! | `row_level`      | [`SharedHandleProvider`]   | one shared handle, filter by tenant id |
//! | `schema_level`   | [`SchemaHandleFactory`]    | handle bound to `tenant_<id>`          |
//! | `database_level` | [`ConnectionPoolManager`]  | dedicated pool per tenant              |
//!
//! [`TenantBinder`] runs the pipeline and [`TenantRouter`] wires it together.
//! Providers reach the database through a [`Connector`]; the in-memory
//! [`MemoryConnector`](memory::MemoryConnector) serves tests and local runs.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fitos_tenancy::tenant::{
//!     DbStrategy, RequestInfo, StaticTenantStore, Tenant, TenantRouter,
//!     memory::MemoryConnector,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = StaticTenantStore::with_tenants([
//!     Tenant::new("t2", "Harbour Gym")
//!         .with_subdomain("harbour")
//!         .with_strategy(DbStrategy::SchemaLevel),
//! ]);
//! let router = TenantRouter::builder(Arc::new(MemoryConnector::new()), Arc::new(store))
//!     .build()
//!     .unwrap();
//!
//! let request = RequestInfo::new("/classes").with_host("harbour.fitos.app");
//! let ctx = router.binder().bind(&request).await.unwrap().into_context().unwrap();
//! assert_eq!(ctx.handle.schema_name().unwrap().as_str(), "tenant_t2");
//! # });
//! ```
//!
//! # Lifecycle of cached handles
//!
//! Schema handles and dedicated pools live in a provisioning cache. Concurrent
//! requests for a missing entry share a single creation. Each request holds a
//! lease on the handle it received; the idle sweep only closes entries no
//! request holds, and forced eviction waits for leases to drain before the
//! connector closes the handle.

mod binder;
mod cache;
mod config;
mod context;
mod directory;
mod manager;
pub mod memory;
mod pool;
mod provider;
mod resolver;
mod router;
mod schema;
mod shared;
mod strategy;
mod sweeper;
pub mod task_local;

pub use binder::{BindOutcome, RequestInfo, StatusGate, TenantBinder};
pub use cache::{CacheConfig, CacheLookup, CacheMetrics, TenantCache};
pub use config::{BinderConfig, ProvisionConfig, ProvisionConfigBuilder};
pub use context::{DbStrategy, RequestContext, Tenant, TenantId, TenantStatus};
pub use directory::TenantDirectory;
pub use manager::ConnectionPoolManager;
pub use pool::{CloseFn, EntryState, Lease, ProvisionStats, ProvisioningCache, Retirement, wait_all};
pub use provider::{Connector, HandleProvider, ProviderTable, TenantHandle, close_fn};
pub use resolver::{
    DynamicTenantStore, StaticTenantStore, StoreFuture, TenantStore, normalize_host,
    subdomain_label,
};
pub use router::{TenantRouter, TenantRouterBuilder};
pub use schema::SchemaHandleFactory;
pub use shared::SharedHandleProvider;
pub use strategy::{
    MAX_IDENTIFIER_LEN, MAX_TENANT_ID_LEN, ProviderKind, RowFilter, SCHEMA_PREFIX, SchemaName,
    classify, derive_identifier, quote_ident, validate_tenant_id,
};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, SweepReport, SweeperHandle, spawn_sweeper, sweep_once};
pub use task_local::{current_tenant, current_tenant_id, has_tenant, require_tenant, with_tenant};
