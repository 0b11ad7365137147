//! # fitos-postgres
//!
//! PostgreSQL backend for FitOS tenant routing.
//!
//! This crate provides:
//! - [`PgConnector`], the [`Connector`](fitos_tenancy::tenant::Connector)
//!   that opens `deadpool-postgres` pools for the shared database, for
//!   tenant schemas and for dedicated tenant databases
//! - [`PgTenantStore`], a [`TenantStore`](fitos_tenancy::tenant::TenantStore)
//!   over the `tenants` table
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fitos_postgres::{PgConnector, PgPool, PgTenantStore, PoolConfig};
//! use fitos_tenancy::{RoutingConfig, tenant::TenantRouter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RoutingConfig::from_file("fitos.toml")?;
//!     let connector = PgConnector::from_routing_config(&config)?;
//!     let pool_config = PoolConfig::with_size(config.database.pool_size);
//!     let store = PgTenantStore::new(PgPool::new(connector.base_config().clone(), &pool_config)?);
//!
//!     let router = TenantRouter::from_config(&config, Arc::new(connector), Arc::new(store))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod pool;
pub mod store;

pub use config::{PgConfig, SslMode};
pub use connection::PgConnection;
pub use connector::{DEFAULT_DATABASE_PREFIX, PgConnector, PgHandle, PgScope};
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PoolConfig, PoolStatus};
pub use store::{PgTenantStore, TenantRecord};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::connector::{PgConnector, PgHandle};
    pub use crate::error::{PgError, PgResult};
    pub use crate::pool::PgPool;
    pub use crate::store::PgTenantStore;
}
