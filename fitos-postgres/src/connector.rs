//! [`Connector`] implementation backed by PostgreSQL pools.
//!
//! Every handle is a small `deadpool-postgres` pool:
//!
//! - the shared handle points at the main database,
//! - a schema handle points at the main database with `search_path` pinned
//!   to the tenant schema through startup options,
//! - a dedicated handle points at the tenant's own database.
//!
//! Each pool opens one connection before it is handed out so that a bad
//! URL, a missing database or a missing schema fails provisioning instead
//! of the first query.

use std::fmt;

use async_trait::async_trait;
use fitos_tenancy::tenant::{Connector, SchemaName, Tenant, derive_identifier};
use fitos_tenancy::{RoutingConfig, TenancyError, TenancyResult};
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};
use crate::pool::{PgPool, PoolConfig, PoolStatus};

/// Default name prefix of dedicated tenant databases.
pub const DEFAULT_DATABASE_PREFIX: &str = "fitos_tenant_";

/// What a [`PgHandle`] points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PgScope {
    /// The main database.
    Shared,
    /// A tenant schema in the main database.
    Schema(SchemaName),
    /// A tenant's own database.
    Database(String),
}

/// A pool scoped to one tenant, or the shared pool.
#[derive(Clone)]
pub struct PgHandle {
    pool: PgPool,
    scope: PgScope,
}

impl PgHandle {
    /// Get a connection.
    pub async fn get(&self) -> PgResult<PgConnection> {
        self.pool.get().await
    }

    /// What this handle points at.
    pub fn scope(&self) -> &PgScope {
        &self.scope
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Pool status.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}

impl fmt::Debug for PgHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgHandle")
            .field("scope", &self.scope)
            .field("status", &self.pool.status())
            .finish()
    }
}

/// Opens tenant pools against a PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PgConnector {
    base: PgConfig,
    pool: PoolConfig,
    database_prefix: String,
}

impl PgConnector {
    /// Create a connector for the main database.
    pub fn new(base: PgConfig) -> Self {
        Self {
            base,
            pool: PoolConfig::default(),
            database_prefix: DEFAULT_DATABASE_PREFIX.to_string(),
        }
    }

    /// Create a connector from a database URL.
    pub fn from_url(url: &str) -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// Create a connector from the `[database]` section of a routing config.
    pub fn from_routing_config(config: &RoutingConfig) -> PgResult<Self> {
        let url = config
            .database_url()
            .ok_or_else(|| PgError::config("[database] url is not set"))?;
        Ok(Self::from_url(url)?
            .with_pool_config(PoolConfig::with_size(config.database.pool_size))
            .with_database_prefix(config.database.tenant_database_prefix.clone()))
    }

    /// Set the settings of every pool opened.
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the name prefix of dedicated tenant databases.
    pub fn with_database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_prefix = prefix.into();
        self
    }

    /// Settings of the main database.
    pub fn base_config(&self) -> &PgConfig {
        &self.base
    }

    /// Connection settings for a dedicated tenant.
    ///
    /// A tenant with its own `database_url` uses it; otherwise the database
    /// name is derived from the tenant id on the main server.
    pub fn dedicated_config(&self, tenant: &Tenant) -> TenancyResult<PgConfig> {
        match &tenant.database_url {
            Some(url) => {
                PgConfig::from_url(url).map_err(|e| TenancyError::from(e).with_tenant(&tenant.id))
            }
            None => {
                let name = derive_identifier(&self.database_prefix, &tenant.id)?;
                Ok(self.base.with_database(name))
            }
        }
    }

    async fn open(&self, config: PgConfig, scope: PgScope) -> PgResult<PgHandle> {
        let pool = PgPool::new(config, &self.pool)?;
        let verified = self.verify(&pool, &scope).await;
        if let Err(e) = verified {
            pool.close();
            return Err(e);
        }
        info!(scope = ?scope, database = %pool.config().database, "Opened tenant pool");
        Ok(PgHandle { pool, scope })
    }

    async fn verify(&self, pool: &PgPool, scope: &PgScope) -> PgResult<()> {
        let conn = pool.get().await?;
        match scope {
            PgScope::Schema(schema) => {
                let row = conn
                    .query_one(
                        "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                        &[&schema.as_str()],
                    )
                    .await?;
                let exists: bool = row.try_get(0)?;
                if !exists {
                    return Err(PgError::SchemaMissing(schema.as_str().to_string()));
                }
            }
            PgScope::Shared | PgScope::Database(_) => {
                conn.query_one("SELECT 1", &[]).await?;
            }
        }
        debug!(scope = ?scope, "Verified pool");
        Ok(())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgHandle;

    async fn connect_shared(&self) -> TenancyResult<PgHandle> {
        Ok(self.open(self.base.clone(), PgScope::Shared).await?)
    }

    async fn connect_schema(
        &self,
        tenant: &Tenant,
        schema: &SchemaName,
    ) -> TenancyResult<PgHandle> {
        self.open(self.base.with_schema(schema), PgScope::Schema(schema.clone()))
            .await
            .map_err(|e| TenancyError::from(e).with_tenant(&tenant.id))
    }

    async fn connect_dedicated(&self, tenant: &Tenant) -> TenancyResult<PgHandle> {
        let config = self.dedicated_config(tenant)?;
        let database = config.database.clone();
        self.open(config, PgScope::Database(database))
            .await
            .map_err(|e| TenancyError::from(e).with_tenant(&tenant.id))
    }

    async fn close(&self, handle: PgHandle) {
        handle.pool.close();
    }
}
