//! Programmatic configuration for the routing components.

use std::time::Duration;

use crate::error::{TenancyError, TenancyResult};

/// Limits for a provisioning cache (schema handles or dedicated pools).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// Maximum number of open handles, counting ones still provisioning.
    pub max_entries: usize,
    /// How long a handle may sit unused before the sweep closes it.
    pub idle_timeout: Duration,
    /// Deadline for creating a handle.
    pub provision_timeout: Duration,
}

impl ProvisionConfig {
    /// Defaults for the shared handle of row-level tenants.
    ///
    /// There is a single entry and it is never swept, so only the
    /// provisioning deadline matters.
    pub fn shared_defaults() -> Self {
        Self {
            max_entries: 1,
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            provision_timeout: Duration::from_secs(10),
        }
    }

    /// Defaults for schema-bound handles.
    pub fn schema_defaults() -> Self {
        Self {
            max_entries: 256,
            idle_timeout: Duration::from_secs(300),
            provision_timeout: Duration::from_secs(10),
        }
    }

    /// Defaults for dedicated per-tenant pools.
    pub fn pool_defaults() -> Self {
        Self {
            max_entries: 64,
            idle_timeout: Duration::from_secs(600),
            provision_timeout: Duration::from_secs(15),
        }
    }

    /// Create a builder starting from [`ProvisionConfig::pool_defaults`].
    pub fn builder() -> ProvisionConfigBuilder {
        ProvisionConfigBuilder::default()
    }

    /// Check the limits make sense.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.max_entries == 0 {
            return Err(TenancyError::config("max_entries must be at least 1"));
        }
        if self.provision_timeout.is_zero() {
            return Err(TenancyError::config("provision_timeout must be non-zero"));
        }
        if self.idle_timeout.is_zero() {
            return Err(TenancyError::config("idle_timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self::pool_defaults()
    }
}

/// Builder for [`ProvisionConfig`].
#[derive(Debug, Default)]
pub struct ProvisionConfigBuilder {
    config: ProvisionConfig,
}

impl ProvisionConfigBuilder {
    /// Set the maximum number of open handles.
    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the provisioning deadline.
    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.config.provision_timeout = timeout;
        self
    }

    /// Validate and build.
    pub fn build(self) -> TenancyResult<ProvisionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Request-facing settings of the binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderConfig {
    /// Header carrying an explicit tenant id.
    pub tenant_header: String,
    /// Header set on successful responses.
    pub response_header: String,
    /// Paths starting with this prefix skip tenant routing.
    pub health_prefix: String,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            tenant_header: "x-tenant-id".to_string(),
            response_header: "x-tenant-id".to_string(),
            health_prefix: "/health".to_string(),
        }
    }
}

impl BinderConfig {
    /// Set the tenant id request header.
    pub fn with_tenant_header(mut self, header: impl Into<String>) -> Self {
        self.tenant_header = header.into().to_ascii_lowercase();
        self
    }

    /// Set the tenant id response header.
    pub fn with_response_header(mut self, header: impl Into<String>) -> Self {
        self.response_header = header.into().to_ascii_lowercase();
        self
    }

    /// Set the health-check path prefix.
    pub fn with_health_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.health_prefix = prefix.into();
        self
    }

    /// Whether a path skips tenant routing.
    ///
    /// `/health` matches `/health` and `/health/ready` but not `/healthy`.
    pub fn is_bypassed(&self, path: &str) -> bool {
        let prefix = self.health_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return false;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}
