//! Task-local access to the tenant of the request being served.
//!
//! The HTTP layer runs each bound request inside [`with_tenant`], so any code
//! awaited from the handler can ask for the current tenant without it being
//! threaded through every call.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fitos_tenancy::tenant::Tenant;
//! use fitos_tenancy::tenant::task_local::{current_tenant_id, with_tenant};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let tenant = Arc::new(Tenant::new("t1", "Acme"));
//!     let id = with_tenant(tenant, async { current_tenant_id() }).await;
//!     assert_eq!(id.unwrap().as_str(), "t1");
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::error::{ErrorCode, TenancyError, TenancyResult};

use super::context::{Tenant, TenantId};

tokio::task_local! {
    static CURRENT_TENANT: Arc<Tenant>;
}

/// Run a future with `tenant` as the current tenant.
pub async fn with_tenant<F, T>(tenant: Arc<Tenant>, f: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_TENANT.scope(tenant, f).await
}

/// The current tenant, if the caller runs inside [`with_tenant`].
#[inline]
pub fn current_tenant() -> Option<Arc<Tenant>> {
    CURRENT_TENANT.try_with(Arc::clone).ok()
}

/// The current tenant id, if set.
#[inline]
pub fn current_tenant_id() -> Option<TenantId> {
    CURRENT_TENANT.try_with(|t| t.id.clone()).ok()
}

/// Check if a tenant is currently set.
#[inline]
pub fn has_tenant() -> bool {
    CURRENT_TENANT.try_with(|_| ()).is_ok()
}

/// The current tenant, or an internal error when called outside a bound request.
pub fn require_tenant() -> TenancyResult<Arc<Tenant>> {
    current_tenant().ok_or_else(|| {
        TenancyError::new(
            ErrorCode::Internal,
            "No tenant bound to the current task; the request bypassed tenant routing",
        )
    })
}
