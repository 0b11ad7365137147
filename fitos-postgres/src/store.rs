//! [`TenantStore`] reading the platform's `tenants` table.
//!
//! Expected columns:
//!
//! | column          | type            |
//! |-----------------|-----------------|
//! | `id`            | any, read as text |
//! | `name`          | text            |
//! | `subdomain`     | text, nullable  |
//! | `custom_domain` | text, nullable  |
//! | `status`        | text            |
//! | `db_strategy`   | text, nullable  |
//! | `plan`          | text, nullable  |
//! | `database_url`  | text, nullable  |

use async_trait::async_trait;
use fitos_tenancy::tenant::{
    DbStrategy, Tenant, TenantId, TenantStatus, TenantStore, quote_ident, subdomain_label,
};
use fitos_tenancy::{TenancyError, TenancyResult};
use tokio_postgres::Row;
use tracing::debug;

use crate::error::{PgError, PgResult};
use crate::pool::PgPool;

const COLUMNS: &str =
    "id::text AS id, name, subdomain, custom_domain, status, db_strategy, plan, database_url";

/// Raw values of one `tenants` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantRecord {
    pub id: String,
    pub name: String,
    pub subdomain: Option<String>,
    pub custom_domain: Option<String>,
    pub status: String,
    pub db_strategy: Option<String>,
    pub plan: Option<String>,
    pub database_url: Option<String>,
}

impl TenantRecord {
    fn from_row(row: &Row) -> PgResult<Self> {
        let get = |e: tokio_postgres::Error| PgError::decode(e.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(get)?,
            name: row.try_get("name").map_err(get)?,
            subdomain: row.try_get("subdomain").map_err(get)?,
            custom_domain: row.try_get("custom_domain").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            db_strategy: row.try_get("db_strategy").map_err(get)?,
            plan: row.try_get("plan").map_err(get)?,
            database_url: row.try_get("database_url").map_err(get)?,
        })
    }

    /// Decode into a [`Tenant`].
    ///
    /// An unknown status reads as inactive and an unknown strategy as the
    /// default strategy; both are logged.
    pub fn into_tenant(self) -> Tenant {
        Tenant {
            id: TenantId::new(self.id),
            name: self.name,
            subdomain: self.subdomain.map(|s| s.to_ascii_lowercase()),
            custom_domain: self.custom_domain.map(|d| d.to_ascii_lowercase()),
            status: TenantStatus::parse_lenient(&self.status),
            db_strategy: DbStrategy::from_optional(self.db_strategy.as_deref()),
            plan: self.plan,
            database_url: self.database_url,
        }
    }
}

/// Tenant lookups against PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
    by_id: String,
    by_domain: String,
    by_subdomain: String,
}

impl PgTenantStore {
    /// Read from the `tenants` table.
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, "tenants")
    }

    /// Read from another table with the same columns.
    pub fn with_table(pool: PgPool, table: &str) -> Self {
        let table = quote_ident(table);
        Self {
            pool,
            by_id: format!("SELECT {} FROM {} WHERE id::text = $1", COLUMNS, table),
            by_domain: format!(
                "SELECT {} FROM {} WHERE lower(custom_domain) = $1 LIMIT 1",
                COLUMNS, table
            ),
            by_subdomain: format!(
                "SELECT {} FROM {} WHERE lower(subdomain) = $1 LIMIT 1",
                COLUMNS, table
            ),
        }
    }

    async fn fetch(&self, sql: &str, value: &str) -> PgResult<Option<Tenant>> {
        let conn = self.pool.get().await?;
        let row = conn.query_opt(sql, &[&value]).await?;
        row.map(|row| TenantRecord::from_row(&row).map(TenantRecord::into_tenant))
            .transpose()
    }
}

fn unavailable(err: PgError) -> TenancyError {
    TenancyError::directory_unavailable(err.to_string()).with_source(err)
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        debug!(tenant_id = %id, "Loading tenant by id");
        self.fetch(&self.by_id, id.as_str()).await.map_err(unavailable)
    }

    async fn find_by_host(&self, host: &str) -> TenancyResult<Option<Tenant>> {
        debug!(host, "Loading tenant by host");
        if let Some(tenant) = self.fetch(&self.by_domain, host).await.map_err(unavailable)? {
            return Ok(Some(tenant));
        }
        match subdomain_label(host) {
            Some(label) => self.fetch(&self.by_subdomain, label).await.map_err(unavailable),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PgConfig;
    use crate::pool::PoolConfig;
    use fitos_tenancy::ErrorCode;
    use pretty_assertions::assert_eq;

    fn unreachable_pool() -> PgPool {
        let config =
            PgConfig::from_url("postgresql://localhost:1/fitos?connect_timeout=1").unwrap();
        PgPool::new(config, &PoolConfig::with_size(1)).unwrap()
    }

    #[test]
    fn test_record_into_tenant() {
        let record = TenantRecord {
            id: "t2".into(),
            name: "Harbour Gym".into(),
            subdomain: Some("Harbour".into()),
            status: "active".into(),
            db_strategy: Some("schema_level".into()),
            ..Default::default()
        };
        let tenant = record.into_tenant();
        assert_eq!(tenant.id.as_str(), "t2");
        assert_eq!(tenant.subdomain.as_deref(), Some("harbour"));
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(tenant.db_strategy, DbStrategy::SchemaLevel);
    }

    #[test]
    fn test_record_with_unknown_values() {
        let record = TenantRecord {
            id: "t9".into(),
            name: "Odd Gym".into(),
            status: "archived".into(),
            db_strategy: Some("sharded".into()),
            ..Default::default()
        };
        let tenant = record.into_tenant();
        assert_eq!(tenant.status, TenantStatus::Inactive);
        assert_eq!(tenant.db_strategy, DbStrategy::DEFAULT);
    }

    #[tokio::test]
    async fn test_queries_quote_table() {
        let store = PgTenantStore::with_table(unreachable_pool(), "gym_tenants");
        assert!(store.by_id.contains("FROM \"gym_tenants\" WHERE id::text = $1"));
        assert!(store.by_domain.contains("lower(custom_domain) = $1"));
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = PgTenantStore::new(unreachable_pool());
        let err = store.find_by_id(&TenantId::new("t1")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DirectoryUnavailable);
        assert!(!err.is_not_found());
    }
}
