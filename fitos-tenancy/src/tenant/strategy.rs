//! Isolation strategy dispatch and the names derived from tenant ids.
//!
//! [`classify`] maps a tenant's [`DbStrategy`] onto the provider that serves
//! it. [`SchemaName`] and [`derive_identifier`] turn tenant ids into storage
//! identifiers; both validate the id alphabet so that two distinct tenants
//! can never share a namespace.

use std::fmt;

use crate::error::{TenancyError, TenancyResult};

use super::context::{DbStrategy, TenantId};

/// Prefix of every tenant schema.
pub const SCHEMA_PREFIX: &str = "tenant_";

/// Longest identifier PostgreSQL accepts without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Longest tenant id that still fits behind [`SCHEMA_PREFIX`].
pub const MAX_TENANT_ID_LEN: usize = MAX_IDENTIFIER_LEN - SCHEMA_PREFIX.len();

/// The provider that serves a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// One process-wide handle shared by every row-level tenant.
    Shared,
    /// One handle per tenant schema.
    Schema,
    /// One dedicated pool per tenant.
    Dedicated,
}

impl ProviderKind {
    /// All kinds, in table order.
    pub const ALL: [ProviderKind; 3] = [Self::Shared, Self::Schema, Self::Dedicated];

    /// Slot of this kind in a provider table.
    pub fn index(&self) -> usize {
        match self {
            Self::Shared => 0,
            Self::Schema => 1,
            Self::Dedicated => 2,
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Schema => "schema",
            Self::Dedicated => "dedicated",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the provider for a strategy.
#[inline]
pub fn classify(strategy: DbStrategy) -> ProviderKind {
    match strategy {
        DbStrategy::RowLevel => ProviderKind::Shared,
        DbStrategy::SchemaLevel => ProviderKind::Schema,
        DbStrategy::DatabaseLevel => ProviderKind::Dedicated,
    }
}

/// Check that a tenant id can be turned into an identifier.
///
/// Ids may only contain ASCII alphanumerics and `-`. Within that alphabet
/// `-` is the only character rewritten during sanitization, so sanitized
/// names stay unique.
pub fn validate_tenant_id(id: &TenantId) -> TenancyResult<()> {
    let raw = id.as_str();
    if raw.is_empty() {
        return Err(TenancyError::invalid_tenant_id(id, "id is empty"));
    }
    if raw.len() > MAX_TENANT_ID_LEN {
        return Err(TenancyError::invalid_tenant_id(
            id,
            format!("id is longer than {} bytes", MAX_TENANT_ID_LEN),
        ));
    }
    if let Some(bad) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return Err(TenancyError::invalid_tenant_id(
            id,
            format!("character {:?} is not allowed", bad),
        ));
    }
    Ok(())
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Build `prefix + sanitized id`, validating both the id and the result length.
pub fn derive_identifier(prefix: &str, id: &TenantId) -> TenancyResult<String> {
    validate_tenant_id(id)?;
    let name = format!("{}{}", prefix, sanitize(id.as_str()));
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(TenancyError::invalid_tenant_id(
            id,
            format!("'{}' is longer than {} bytes", name, MAX_IDENTIFIER_LEN),
        ));
    }
    Ok(name)
}

/// Name of a tenant's schema: `tenant_` followed by the sanitized id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaName(String);

impl SchemaName {
    /// Derive the schema name for a tenant id.
    pub fn derive(id: &TenantId) -> TenancyResult<Self> {
        derive_identifier(SCHEMA_PREFIX, id).map(Self)
    }

    /// The bare schema name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The schema name as a quoted SQL identifier.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }

    /// Search path with the tenant schema first and `public` second.
    pub fn search_path(&self) -> String {
        format!("{}, public", self.quoted())
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The tenant predicate every row-level query must carry.
///
/// The shared handle does not isolate anything by itself; callers append
/// [`RowFilter::predicate`] to their `WHERE` clause and bind the tenant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    column: String,
}

impl RowFilter {
    /// Filter on the given column.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    /// The tenant column.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Predicate text bound to the numbered placeholder.
    pub fn predicate(&self, param_index: usize) -> String {
        format!("{} = ${}", quote_ident(&self.column), param_index)
    }

    /// Add the predicate to a single-table statement.
    ///
    /// An existing `WHERE` condition is parenthesised so the tenant predicate
    /// cannot be bypassed by an `OR`. Trailing clauses such as `ORDER BY`
    /// stay at the end.
    pub fn apply(&self, sql: &str, param_index: usize) -> String {
        const TAIL_CLAUSES: [&str; 5] =
            [" GROUP BY ", " ORDER BY ", " LIMIT ", " OFFSET ", " RETURNING "];

        let predicate = self.predicate(param_index);
        let sql = sql.trim_end();
        let upper = sql.to_ascii_uppercase();
        let tail_at = TAIL_CLAUSES
            .iter()
            .filter_map(|clause| upper.find(clause))
            .min()
            .unwrap_or(sql.len());
        let (head, tail) = sql.split_at(tail_at);

        match upper[..tail_at].find(" WHERE ") {
            Some(at) => format!(
                "{} WHERE ({}) AND {}{}",
                &head[..at],
                &head[at + " WHERE ".len()..],
                predicate,
                tail
            ),
            None => format!("{} WHERE {}{}", head, predicate, tail),
        }
    }
}

impl Default for RowFilter {
    fn default() -> Self {
        Self::new("tenant_id")
    }
}
