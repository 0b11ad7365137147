//! Configuration file parsing for `fitos.toml`.
//!
//! ```toml
//! [routing]
//! tenant_header = "x-tenant-id"
//! health_prefix = "/health"
//!
//! [directory]
//! ttl = "30s"
//! negative_ttl = "5s"
//!
//! [pool]
//! max_pools = 64
//! idle_timeout = "10m"
//!
//! [database]
//! url = "${DATABASE_URL}"
//! ```
//!
//! Every section is optional and falls back to the component defaults.
//! `${VAR}` references are replaced with the environment variable's value
//! before parsing; unset variables are left as written.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{BinderConfig, CacheConfig, DEFAULT_SWEEP_INTERVAL, ProvisionConfig};

/// Main configuration structure for `fitos.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Request-facing settings.
    #[serde(default)]
    pub routing: RoutingSection,

    /// Tenant directory cache.
    #[serde(default)]
    pub directory: DirectorySection,

    /// Schema handle factory.
    #[serde(default)]
    pub schema: SchemaSection,

    /// Dedicated pool manager.
    #[serde(default)]
    pub pool: PoolSection,

    /// Idle sweeper.
    #[serde(default)]
    pub sweeper: SweeperSection,

    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseSection,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl RoutingConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::config(format!("cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> TenancyResult<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Self = toml::from_str(&expanded).map_err(|e| {
            TenancyError::config(format!("invalid fitos.toml: {}", e)).with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the overrides of a named environment.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(url) = overrides.database_url {
                self.database.url = Some(url);
            }
            if let Some(pool_size) = overrides.pool_size {
                self.database.pool_size = pool_size;
            }
            if let Some(max_pools) = overrides.max_pools {
                self.pool.max_pools = max_pools;
            }
        }
        self
    }

    /// Check every section converts into a valid component config.
    pub fn validate(&self) -> TenancyResult<()> {
        self.shared_config()?;
        self.schema_config()?;
        self.pool_config()?;
        if self.database.pool_size == 0 {
            return Err(TenancyError::config("database.pool_size must be at least 1"));
        }
        if self.sweeper.enabled && self.sweeper.interval.is_zero() {
            return Err(TenancyError::config("sweeper.interval must be non-zero"));
        }
        Ok(())
    }

    /// Directory cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.directory.max_entries)
            .with_ttl(self.directory.ttl)
            .with_negative_ttl(self.directory.negative_ttl)
    }

    /// Deadline for opening the shared handle of row-level tenants.
    pub fn shared_config(&self) -> TenancyResult<ProvisionConfig> {
        let config = ProvisionConfig {
            provision_timeout: self.database.provision_timeout,
            ..ProvisionConfig::shared_defaults()
        };
        config
            .validate()
            .map_err(|e| TenancyError::config(format!("[database] {}", e.message)))?;
        Ok(config)
    }

    /// Schema handle factory limits.
    pub fn schema_config(&self) -> TenancyResult<ProvisionConfig> {
        ProvisionConfig::builder()
            .max_entries(self.schema.max_handles)
            .idle_timeout(self.schema.idle_timeout)
            .provision_timeout(self.schema.provision_timeout)
            .build()
            .map_err(|e| TenancyError::config(format!("[schema] {}", e.message)))
    }

    /// Dedicated pool limits.
    pub fn pool_config(&self) -> TenancyResult<ProvisionConfig> {
        ProvisionConfig::builder()
            .max_entries(self.pool.max_pools)
            .idle_timeout(self.pool.idle_timeout)
            .provision_timeout(self.pool.provision_timeout)
            .build()
            .map_err(|e| TenancyError::config(format!("[pool] {}", e.message)))
    }

    /// Binder settings.
    pub fn binder_config(&self) -> BinderConfig {
        BinderConfig::default()
            .with_tenant_header(&self.routing.tenant_header)
            .with_response_header(&self.routing.response_header)
            .with_health_prefix(&self.routing.health_prefix)
    }

    /// Interval of the idle sweeper, or `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweeper.enabled.then_some(self.sweeper.interval)
    }

    /// The database URL, if configured.
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }
}

/// `[routing]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingSection {
    /// Header carrying an explicit tenant id.
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    /// Header set on bound responses.
    #[serde(default = "default_tenant_header")]
    pub response_header: String,

    /// Paths under this prefix skip tenant routing.
    #[serde(default = "default_health_prefix")]
    pub health_prefix: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            tenant_header: default_tenant_header(),
            response_header: default_tenant_header(),
            health_prefix: default_health_prefix(),
        }
    }
}

fn default_tenant_header() -> String {
    "x-tenant-id".to_string()
}

fn default_health_prefix() -> String {
    "/health".to_string()
}

/// `[directory]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectorySection {
    /// Maximum cached lookups.
    #[serde(default = "default_directory_entries")]
    pub max_entries: usize,

    /// Lifetime of a found tenant.
    #[serde(default = "default_ttl", deserialize_with = "de_duration")]
    pub ttl: Duration,

    /// Lifetime of a not-found answer.
    #[serde(default = "default_negative_ttl", deserialize_with = "de_duration")]
    pub negative_ttl: Duration,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            max_entries: default_directory_entries(),
            ttl: default_ttl(),
            negative_ttl: default_negative_ttl(),
        }
    }
}

fn default_directory_entries() -> usize {
    CacheConfig::default().max_entries
}

fn default_ttl() -> Duration {
    CacheConfig::default().ttl
}

fn default_negative_ttl() -> Duration {
    CacheConfig::default().negative_ttl
}

/// `[schema]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaSection {
    /// Maximum open schema handles.
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,

    /// Idle time before a handle is closed.
    #[serde(default = "default_schema_idle", deserialize_with = "de_duration")]
    pub idle_timeout: Duration,

    /// Deadline for creating a handle.
    #[serde(default = "default_schema_provision", deserialize_with = "de_duration")]
    pub provision_timeout: Duration,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            max_handles: default_max_handles(),
            idle_timeout: default_schema_idle(),
            provision_timeout: default_schema_provision(),
        }
    }
}

fn default_max_handles() -> usize {
    ProvisionConfig::schema_defaults().max_entries
}

fn default_schema_idle() -> Duration {
    ProvisionConfig::schema_defaults().idle_timeout
}

fn default_schema_provision() -> Duration {
    ProvisionConfig::schema_defaults().provision_timeout
}

/// `[pool]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    /// Maximum open dedicated pools.
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,

    /// Idle time before a pool is closed.
    #[serde(default = "default_pool_idle", deserialize_with = "de_duration")]
    pub idle_timeout: Duration,

    /// Deadline for opening a pool.
    #[serde(default = "default_pool_provision", deserialize_with = "de_duration")]
    pub provision_timeout: Duration,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_pools: default_max_pools(),
            idle_timeout: default_pool_idle(),
            provision_timeout: default_pool_provision(),
        }
    }
}

fn default_max_pools() -> usize {
    ProvisionConfig::pool_defaults().max_entries
}

fn default_pool_idle() -> Duration {
    ProvisionConfig::pool_defaults().idle_timeout
}

fn default_pool_provision() -> Duration {
    ProvisionConfig::pool_defaults().provision_timeout
}

/// `[sweeper]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperSection {
    /// Whether the background sweeper runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between sweeps.
    #[serde(default = "default_sweep_interval", deserialize_with = "de_duration")]
    pub interval: Duration,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

/// `[database]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Connection URL of the shared database (supports `${ENV_VAR}`).
    pub url: Option<String>,

    /// Connections per pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Name prefix of dedicated tenant databases.
    #[serde(default = "default_tenant_database_prefix")]
    pub tenant_database_prefix: String,

    /// Deadline for opening the shared handle.
    #[serde(default = "default_shared_provision", deserialize_with = "de_duration")]
    pub provision_timeout: Duration,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            tenant_database_prefix: default_tenant_database_prefix(),
            provision_timeout: default_shared_provision(),
        }
    }
}

fn default_pool_size() -> usize {
    5
}

fn default_tenant_database_prefix() -> String {
    "fitos_tenant_".to_string()
}

fn default_shared_provision() -> Duration {
    ProvisionConfig::shared_defaults().provision_timeout
}

/// `[environments.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Override `database.url`.
    pub database_url: Option<String>,

    /// Override `database.pool_size`.
    pub pool_size: Option<usize>,

    /// Override `pool.max_pools`.
    pub max_pools: Option<usize>,
}

/// Parse a duration such as `"250ms"`, `"30s"`, `"10m"` or `"1h"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> TenancyResult<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| TenancyError::config(format!("invalid duration '{}'", value)))?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3600),
        other => {
            return Err(TenancyError::config(format!(
                "unknown duration unit '{}' in '{}'",
                other, value
            )));
        }
    };
    Ok(duration)
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(|e| serde::de::Error::custom(e.message))
}

/// Expand environment variables in the format `${VAR_NAME}`.
fn expand_env_vars(content: &str) -> TenancyResult<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| TenancyError::internal(format!("env pattern: {}", e)))?;

    let expanded = re.replace_all(content, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });
    Ok(expanded.into_owned())
}
