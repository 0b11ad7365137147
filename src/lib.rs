//! # FitOS Router
//!
//! Tenant-aware data-access routing for the FitOS platform.
//!
//! Every inbound request is mapped to the gym business (tenant) that owns it
//! and handed a database handle scoped to that tenant, under the isolation
//! strategy the tenant was provisioned with:
//!
//! | Strategy         | Handle                                    |
//! |------------------|-------------------------------------------|
//! | `row_level`      | the shared handle; queries filter by id   |
//! | `schema_level`   | a handle pinned to the `tenant_<id>` schema |
//! | `database_level` | a dedicated pool for the tenant           |
//!
//! This crate re-exports the workspace crates:
//!
//! - [`tenancy`]: resolution, gating and handle providers,
//! - [`postgres`] (feature `postgres`): the PostgreSQL connector and tenant store,
//! - [`axum`] (feature `axum`): the tower layer and extractors.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fitos_router::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     fitos_router::tenancy::init_logging();
//!
//!     let config = RoutingConfig::from_file("fitos.toml")?.with_environment("production");
//!     let router = fitos_router::postgres_router(&config)?;
//!     let sweeper = config.sweep_interval().map(|every| router.spawn_sweeper(every));
//!
//!     let app = axum::Router::new()
//!         .route("/members", axum::routing::get(members))
//!         .layer(TenancyLayer::for_router(&router)?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!
//!     if let Some(sweeper) = sweeper {
//!         sweeper.stop().await;
//!     }
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Tenant resolution, gating and handle providers.
pub mod tenancy {
    pub use fitos_tenancy::*;
}

/// PostgreSQL connector and tenant store.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use fitos_postgres::*;
}

/// Axum integration.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use fitos_axum::*;
}

/// Tenant router backed by PostgreSQL.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub type PgTenantRouter = fitos_tenancy::tenant::TenantRouter<fitos_postgres::PgConnector>;

/// Build a router over PostgreSQL from a loaded configuration.
///
/// The tenant directory reads the `tenants` table of the main database
/// through its own pool. No connection is opened until the first request.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub fn postgres_router(
    config: &fitos_tenancy::RoutingConfig,
) -> fitos_tenancy::TenancyResult<PgTenantRouter> {
    use std::sync::Arc;

    let connector = fitos_postgres::PgConnector::from_routing_config(config)?;
    let store_pool = fitos_postgres::PgPool::new(
        connector.base_config().clone(),
        &fitos_postgres::PoolConfig::with_size(config.database.pool_size),
    )?;
    let store = fitos_postgres::PgTenantStore::new(store_pool);
    fitos_tenancy::tenant::TenantRouter::from_config(config, Arc::new(connector), Arc::new(store))
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use fitos_tenancy::prelude::*;

    #[cfg(feature = "postgres")]
    pub use fitos_postgres::prelude::*;

    #[cfg(feature = "axum")]
    pub use fitos_axum::prelude::*;
}

// Re-export key types at the crate root
pub use fitos_tenancy::{RoutingConfig, TenancyError, TenancyResult};
