//! PostgreSQL connection wrapper.

use deadpool_postgres::Object;
use fitos_tenancy::tenant::{RowFilter, TenantId};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::PgResult;

/// A pooled connection. Statements are prepared once per physical
/// connection and reused.
pub struct PgConnection {
    client: Object,
}

impl PgConnection {
    pub(crate) fn new(client: Object) -> Self {
        Self { client }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query(&stmt, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Row> {
        debug!(sql = %sql, "Executing query_one");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_one(&stmt, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> PgResult<Option<Row>> {
        debug!(sql = %sql, "Executing query_opt");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_opt(&stmt, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.execute(&stmt, params).await?)
    }

    /// Run a single-table query on the shared handle, restricted to one tenant.
    ///
    /// The tenant predicate is added to `sql` and the tenant id is bound as
    /// the parameter after `params`.
    pub async fn query_for_tenant(
        &self,
        filter: &RowFilter,
        tenant_id: &TenantId,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> PgResult<Vec<Row>> {
        let scoped = filter.apply(sql, params.len() + 1);
        let id = tenant_id.as_str();
        let mut bound: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(params.len() + 1);
        bound.extend_from_slice(params);
        bound.push(&id);
        self.query(&scoped, &bound).await
    }

    /// Get the underlying tokio-postgres client.
    pub fn inner(&self) -> &Object {
        &self.client
    }
}
