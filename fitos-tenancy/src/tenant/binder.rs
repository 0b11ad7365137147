//! Per-request pipeline from raw request data to a bound tenant handle.
//!
//! ```text
//! Start -> Resolving -> NotFound
//!                    -> Resolved -> Rejected
//!                                -> Gated -> Provisioning -> ProvisioningFailed
//!                                                         -> Ready -> Bound
//! ```
//!
//! The binder knows nothing about HTTP. A transport layer extracts a
//! [`RequestInfo`], calls [`TenantBinder::bind`] and maps a failure onto a
//! response with [`TenancyError::outcome`].

use std::sync::Arc;

use tracing::{Instrument, debug, info_span, warn};

use crate::error::{TenancyError, TenancyResult};

use super::config::BinderConfig;
use super::context::{RequestContext, Tenant, TenantId};
use super::directory::TenantDirectory;
use super::provider::ProviderTable;
use super::strategy::classify;

/// The parts of a request the binder looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Value of the tenant id header, if present.
    pub tenant_id: Option<String>,
    /// Value of the `Host` header, if present.
    pub host: Option<String>,
    /// Request path.
    pub path: String,
}

impl RequestInfo {
    /// A request for a path with no tenant information.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the explicit tenant id.
    pub fn with_tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Result of a successful [`TenantBinder::bind`].
#[derive(Debug)]
pub enum BindOutcome<H> {
    /// The path skips tenant routing.
    Bypassed,
    /// The request is bound to a tenant.
    Bound(RequestContext<H>),
}

impl<H> BindOutcome<H> {
    /// The bound context, if any.
    pub fn context(&self) -> Option<&RequestContext<H>> {
        match self {
            Self::Bypassed => None,
            Self::Bound(ctx) => Some(ctx),
        }
    }

    /// Take the bound context, if any.
    pub fn into_context(self) -> Option<RequestContext<H>> {
        match self {
            Self::Bypassed => None,
            Self::Bound(ctx) => Some(ctx),
        }
    }
}

/// Only active tenants are routable.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusGate;

impl StatusGate {
    /// Admit or reject a tenant.
    pub fn check(tenant: &Tenant) -> TenancyResult<()> {
        if tenant.is_active() {
            Ok(())
        } else {
            Err(TenancyError::not_active(&tenant.id, tenant.status))
        }
    }
}

/// Resolves, gates and provisions for every request.
pub struct TenantBinder<H> {
    directory: Arc<TenantDirectory>,
    providers: Arc<ProviderTable<H>>,
    config: BinderConfig,
}

impl<H> Clone for TenantBinder<H> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            providers: Arc::clone(&self.providers),
            config: self.config.clone(),
        }
    }
}

impl<H: Send + Sync + 'static> TenantBinder<H> {
    /// Create a binder.
    pub fn new(
        directory: Arc<TenantDirectory>,
        providers: Arc<ProviderTable<H>>,
        config: BinderConfig,
    ) -> Self {
        Self {
            directory,
            providers,
            config,
        }
    }

    /// Request-facing settings.
    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// The directory used for resolution.
    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    /// The provider table used for provisioning.
    pub fn providers(&self) -> &Arc<ProviderTable<H>> {
        &self.providers
    }

    /// Whether a path skips tenant routing.
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.config.is_bypassed(path)
    }

    /// Find the tenant a request belongs to.
    ///
    /// An explicit id wins over the host. When an id is given and unknown the
    /// request is not found, even if the host would have matched a tenant.
    pub async fn resolve(&self, request: &RequestInfo) -> TenancyResult<Arc<Tenant>> {
        let explicit = request
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if let Some(raw) = explicit {
            let id = TenantId::new(raw);
            if let Some(host) = request.host.as_deref() {
                debug!(tenant_id = %id, host, "Explicit tenant id takes precedence over host");
            }
            return self
                .directory
                .resolve_by_id(&id)
                .await?
                .ok_or_else(|| TenancyError::not_found_by_id(&id));
        }

        match request.host.as_deref() {
            Some(host) => self
                .directory
                .resolve_by_host(host)
                .await?
                .ok_or_else(|| TenancyError::not_found_by_host(host)),
            None => Err(TenancyError::unidentified()),
        }
    }

    /// Run the full pipeline for a request.
    pub async fn bind(&self, request: &RequestInfo) -> TenancyResult<BindOutcome<H>> {
        if self.is_bypassed(&request.path) {
            debug!(path = %request.path, stage = "bypassed", "Skipping tenant routing");
            return Ok(BindOutcome::Bypassed);
        }

        let span = info_span!(
            "tenant_bind",
            path = %request.path,
            tenant_id = tracing::field::Empty,
            strategy = tracing::field::Empty,
        );
        self.bind_inner(request).instrument(span).await
    }

    async fn bind_inner(&self, request: &RequestInfo) -> TenancyResult<BindOutcome<H>> {
        let span = tracing::Span::current();

        let tenant = match self.resolve(request).await {
            Ok(tenant) => tenant,
            Err(e) => {
                debug!(stage = "resolving", error = %e, "Tenant resolution failed");
                return Err(e);
            }
        };
        span.record("tenant_id", tracing::field::display(&tenant.id));
        span.record("strategy", tenant.db_strategy.as_str());
        debug!(stage = "resolved", "Tenant resolved");

        if let Err(e) = StatusGate::check(&tenant) {
            warn!(stage = "rejected", status = %tenant.status, "Tenant is not active");
            // Detached: closes run once in-flight requests drop their leases.
            let retiring = self.providers.release(&tenant.id);
            if !retiring.is_empty() {
                debug!(released = retiring.len(), "Released cached handles of rejected tenant");
            }
            return Err(e);
        }
        debug!(stage = "gated", "Tenant admitted");

        let kind = classify(tenant.db_strategy);
        debug!(stage = "provisioning", provider = %kind, "Obtaining handle");
        let handle = match self.providers.provide(kind, &tenant).await {
            Ok(handle) => handle,
            Err(e) => {
                let e = e.with_tenant(&tenant.id);
                tracing::error!(
                    stage = "provisioning_failed",
                    error = %e,
                    "Could not obtain tenant handle"
                );
                return Err(e);
            }
        };

        debug!(stage = "bound", provider = %kind, "Request bound to tenant");
        Ok(BindOutcome::Bound(RequestContext::new(tenant, handle)))
    }
}

impl<H> std::fmt::Debug for TenantBinder<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantBinder")
            .field("directory", &self.directory)
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish()
    }
}
