//! Tenant records and the per-request routing context.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::provider::TenantHandle;

/// A unique identifier for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<uuid::Uuid> for TenantId {
    fn from(u: uuid::Uuid) -> Self {
        Self::new(u.to_string())
    }
}

/// Lifecycle status of a tenant.
///
/// Decoding never fails: anything that is not a known status is treated as
/// [`TenantStatus::Inactive`] so that a malformed record can never be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TenantStatus {
    /// Tenant may be served.
    Active,
    /// Tenant is disabled.
    #[default]
    Inactive,
    /// Tenant is suspended, typically for billing reasons.
    Suspended,
}

impl TenantStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Decode a status string, failing closed on unknown values.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "suspended" => Self::Suspended,
            other => {
                warn!(status = other, "Unknown tenant status, treating as inactive");
                Self::Inactive
            }
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TenantStatus {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<TenantStatus> for String {
    fn from(status: TenantStatus) -> Self {
        status.as_str().to_string()
    }
}

/// How a tenant's data is isolated in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DbStrategy {
    /// Shared tables, every query filtered by tenant id.
    RowLevel,
    /// Shared database, one schema per tenant.
    SchemaLevel,
    /// Dedicated database per tenant.
    DatabaseLevel,
}

impl DbStrategy {
    /// Strategy used when a record carries no strategy or an unknown one.
    pub const DEFAULT: DbStrategy = DbStrategy::SchemaLevel;

    /// Wire name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RowLevel => "row_level",
            Self::SchemaLevel => "schema_level",
            Self::DatabaseLevel => "database_level",
        }
    }

    /// Decode an optional strategy string, falling back to [`DbStrategy::DEFAULT`].
    pub fn from_optional(value: Option<&str>) -> Self {
        match value {
            Some(value) => Self::parse_lenient(value),
            None => {
                warn!(
                    fallback = Self::DEFAULT.as_str(),
                    "Tenant has no db strategy, using default"
                );
                Self::DEFAULT
            }
        }
    }

    /// Decode a strategy string, falling back to [`DbStrategy::DEFAULT`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.parse() {
            Ok(strategy) => strategy,
            Err(_) => {
                warn!(
                    strategy = value,
                    fallback = Self::DEFAULT.as_str(),
                    "Unknown tenant db strategy, using default"
                );
                Self::DEFAULT
            }
        }
    }
}

impl Default for DbStrategy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for DbStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row_level" => Ok(Self::RowLevel),
            "schema_level" => Ok(Self::SchemaLevel),
            "database_level" => Ok(Self::DatabaseLevel),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DbStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DbStrategy {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<DbStrategy> for String {
    fn from(strategy: DbStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// A tenant record as stored in the tenant directory.
///
/// Records are read-only here; they are created and updated by the tenant
/// provisioning flow elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable unique identifier.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Subdomain label, e.g. `acme` for `acme.fitos.example`.
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Fully qualified custom domain.
    #[serde(default)]
    pub custom_domain: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: TenantStatus,
    /// Isolation strategy.
    #[serde(default)]
    pub db_strategy: DbStrategy,
    /// Billing plan, carried but not used for routing.
    #[serde(default)]
    pub plan: Option<String>,
    /// Explicit connection URL for a dedicated database.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Tenant {
    /// Create an active tenant using the default strategy.
    pub fn new(id: impl Into<TenantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            subdomain: None,
            custom_domain: None,
            status: TenantStatus::Active,
            db_strategy: DbStrategy::DEFAULT,
            plan: None,
            database_url: None,
        }
    }

    /// Set the subdomain label.
    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into().to_ascii_lowercase());
        self
    }

    /// Set the custom domain.
    pub fn with_custom_domain(mut self, domain: impl Into<String>) -> Self {
        self.custom_domain = Some(domain.into().to_ascii_lowercase());
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the isolation strategy.
    pub fn with_strategy(mut self, strategy: DbStrategy) -> Self {
        self.db_strategy = strategy;
        self
    }

    /// Set the billing plan.
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    /// Set a dedicated database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Whether the tenant may be routed.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Everything a downstream handler needs about the current request's tenant.
///
/// Created once the request is bound and dropped with the request. Dropping
/// it releases the lease on any cached handle.
#[derive(Debug)]
pub struct RequestContext<H> {
    /// The resolved tenant.
    pub tenant: Arc<Tenant>,
    /// A database handle scoped to the tenant.
    pub handle: TenantHandle<H>,
}

impl<H> RequestContext<H> {
    /// Create a new context.
    pub fn new(tenant: Arc<Tenant>, handle: TenantHandle<H>) -> Self {
        Self { tenant, handle }
    }

    /// The resolved tenant id.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }
}
