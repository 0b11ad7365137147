//! # fitos-tenancy
//!
//! Tenant-aware data-access routing for the FitOS platform.
//!
//! For every inbound request this crate works out which tenant owns it,
//! checks the tenant may be served, and hands back a database handle scoped
//! to that tenant under one of three isolation strategies:
//!
//! - **Row-level**: all tenants share one handle; queries filter by `tenant_id`
//! - **Schema-level**: each tenant has its own schema in a shared database
//! - **Database-level**: each tenant has a dedicated database and pool
//!
//! The crate is transport- and driver-agnostic. HTTP integration lives in
//! `fitos-axum`; PostgreSQL connectivity lives in `fitos-postgres`.
//!
//! ## Errors
//!
//! Every failure is a [`TenancyError`] carrying an [`ErrorCode`]. The code
//! decides the request outcome:
//!
//! ```rust
//! use fitos_tenancy::{ErrorCode, FailureOutcome, TenancyError};
//!
//! let err = TenancyError::not_found_by_host("nobody.fitos.app");
//! assert_eq!(err.code, ErrorCode::TenantNotFound);
//! assert_eq!(err.outcome(), FailureOutcome::NotFound);
//! assert_eq!(err.outcome().status_code(), 404);
//! ```
//!
//! ## Configuration
//!
//! Components can be configured in code or from a `fitos.toml` file, see
//! [`config::RoutingConfig`].
//!
//! ## Logging
//!
//! All components log through `tracing`. Enable the `tracing-subscriber`
//! feature and call [`init_logging`] to install a subscriber controlled by
//! `FITOS_DEBUG`, `FITOS_LOG_LEVEL` and `FITOS_LOG_FORMAT`.

pub mod config;
pub mod error;
pub mod logging;
pub mod tenant;

pub use config::{RoutingConfig, parse_duration};
pub use error::{ErrorCode, FailureOutcome, TenancyError, TenancyResult};

// Re-export logging utilities
pub use logging::{
    get_log_format, get_log_level, init as init_logging, init_debug, init_with_level,
    is_debug_enabled,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::RoutingConfig;
    pub use crate::error::{ErrorCode, FailureOutcome, TenancyError, TenancyResult};
    pub use crate::tenant::{
        BindOutcome, Connector, DbStrategy, HandleProvider, ProviderKind, RequestContext,
        RequestInfo, Tenant, TenantBinder, TenantHandle, TenantId, TenantRouter, TenantStatus,
        TenantStore, current_tenant, with_tenant,
    };
}
