//! Axum integration for FitOS tenant routing.
//!
//! [`TenancyLayer`] binds every request to its tenant before the handler
//! runs:
//!
//! - the tenant is taken from the tenant id header or else from `Host`,
//! - inactive tenants are refused with `403`, unknown ones with `404`,
//! - a database handle for the tenant's strategy is provisioned or reused,
//! - the handler runs with the tenant set as the task-local current tenant,
//! - the response carries the tenant id header.
//!
//! Failures are answered with a JSON body of the form
//! `{"success": false, "error": {"message": "..."}}`. Paths under the health
//! prefix skip routing entirely.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use fitos_axum::{Tenancy, TenancyLayer};
//! use fitos_postgres::{PgConnector, PgHandle, PgTenantStore};
//! use fitos_tenancy::tenant::TenantRouter;
//!
//! async fn members(Tenancy(ctx): Tenancy<PgHandle>) -> String {
//!     let conn = ctx.handle.get().await.unwrap();
//!     // ...
//!     ctx.tenant.name.clone()
//! }
//!
//! let router = TenantRouter::builder(connector, store).build()?;
//! let app = Router::new()
//!     .route("/members", get(members))
//!     .layer(TenancyLayer::for_router(&router)?);
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header};
use http_body_util::BodyExt;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use fitos_tenancy::tenant::task_local::with_tenant;
use fitos_tenancy::tenant::{
    BindOutcome, BinderConfig, Connector, RequestContext, RequestInfo, Tenant, TenantBinder,
    TenantRouter,
};
use fitos_tenancy::{FailureOutcome, TenancyError};

/// Errors raised while setting up the integration.
#[derive(Error, Debug)]
pub enum TenancyAxumError {
    /// A configured header name is not a valid HTTP header name.
    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),
}

/// Result type for setup operations.
pub type Result<T> = std::result::Result<T, TenancyAxumError>;

/// A routing failure turned into an HTTP response.
///
/// Only the status and a generic message reach the client; the underlying
/// error is logged.
#[derive(Debug, Clone)]
pub struct TenancyRejection {
    error: TenancyError,
}

impl TenancyRejection {
    /// The underlying error.
    pub fn error(&self) -> &TenancyError {
        &self.error
    }

    /// The outcome class of the failure.
    pub fn outcome(&self) -> FailureOutcome {
        self.error.outcome()
    }
}

impl From<TenancyError> for TenancyRejection {
    fn from(error: TenancyError) -> Self {
        Self { error }
    }
}

impl IntoResponse for TenancyRejection {
    fn into_response(self) -> Response {
        let outcome = self.outcome();
        match outcome {
            FailureOutcome::NotFound | FailureOutcome::Forbidden => {
                warn!(
                    code = %self.error.code,
                    tenant_id = ?self.error.tenant_id,
                    error = %self.error.message,
                    "Tenant request rejected"
                );
            }
            FailureOutcome::Unavailable | FailureOutcome::Internal => {
                error!(
                    code = %self.error.code,
                    tenant_id = ?self.error.tenant_id,
                    error = %self.error.message,
                    "Tenant request failed"
                );
            }
        }

        let status = StatusCode::from_u16(outcome.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "success": false,
            "error": { "message": outcome.public_message() },
        }));
        let mut response = (status, body).into_response();
        if outcome == FailureOutcome::Unavailable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Tower layer that binds requests to tenants.
pub struct TenancyLayer<H> {
    binder: TenantBinder<H>,
    response_header: HeaderName,
}

impl<H> Clone for TenancyLayer<H> {
    fn clone(&self) -> Self {
        Self {
            binder: self.binder.clone(),
            response_header: self.response_header.clone(),
        }
    }
}

impl<H: Send + Sync + 'static> TenancyLayer<H> {
    /// Create a layer around a binder.
    ///
    /// Fails if the configured response header is not a valid header name.
    pub fn new(binder: TenantBinder<H>) -> Result<Self> {
        let response_header = header_name(&binder.config().response_header)?;
        Ok(Self {
            binder,
            response_header,
        })
    }

    /// Create a layer using a router's binder.
    pub fn for_router<C>(router: &TenantRouter<C>) -> Result<Self>
    where
        C: Connector<Handle = H>,
    {
        Self::new(router.binder().clone())
    }

    /// The binder used by this layer.
    pub fn binder(&self) -> &TenantBinder<H> {
        &self.binder
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TenancyAxumError::InvalidHeaderName(name.to_string()))
}

impl<S, H> Layer<S> for TenancyLayer<H> {
    type Service = TenancyService<S, H>;

    fn layer(&self, inner: S) -> Self::Service {
        TenancyService {
            inner,
            binder: self.binder.clone(),
            response_header: self.response_header.clone(),
        }
    }
}

/// Service produced by [`TenancyLayer`].
pub struct TenancyService<S, H> {
    inner: S,
    binder: TenantBinder<H>,
    response_header: HeaderName,
}

impl<S: Clone, H> Clone for TenancyService<S, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            binder: self.binder.clone(),
            response_header: self.response_header.clone(),
        }
    }
}

impl<S, H, B> Service<Request<B>> for TenancyService<S, H>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    H: Send + Sync + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Response, S::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // The clone may not be ready; keep the instance that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let binder = self.binder.clone();
        let response_header = self.response_header.clone();
        let info = request_info(
            request.uri().path(),
            request.headers(),
            request.uri().authority(),
            binder.config(),
        );

        Box::pin(async move {
            let ctx = match binder.bind(&info).await {
                Ok(BindOutcome::Bypassed) => return inner.call(request).await,
                Ok(BindOutcome::Bound(ctx)) => Arc::new(ctx),
                Err(err) => return Ok(TenancyRejection::from(err).into_response()),
            };

            let tenant = Arc::clone(&ctx.tenant);
            request.extensions_mut().insert(Arc::clone(&ctx));
            request.extensions_mut().insert(Arc::clone(&tenant));

            let mut response =
                with_tenant(Arc::clone(&tenant), async move { inner.call(request).await }).await?;

            match HeaderValue::from_str(tenant.id.as_str()) {
                Ok(value) => {
                    response.headers_mut().insert(response_header, value);
                }
                Err(_) => debug!(tenant_id = %tenant.id, "Tenant id is not a valid header value"),
            }
            Ok(hold_until_sent(response, ctx))
        })
    }
}

/// Keep the context, and with it the handle lease, until the body is done.
fn hold_until_sent<H>(response: Response, ctx: Arc<RequestContext<H>>) -> Response
where
    H: Send + Sync + 'static,
{
    response.map(|body| {
        Body::new(body.map_frame(move |frame| {
            let _held = &ctx;
            frame
        }))
    })
}

fn header_str<'a, K>(headers: &'a HeaderMap, name: K) -> Option<&'a str>
where
    K: http::header::AsHeaderName,
{
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn request_info(
    path: &str,
    headers: &HeaderMap,
    authority: Option<&http::uri::Authority>,
    config: &BinderConfig,
) -> RequestInfo {
    let mut info = RequestInfo::new(path);
    if let Some(id) = header_str(headers, config.tenant_header.as_str()) {
        info = info.with_tenant_id(id);
    }
    // HTTP/2 requests carry the host in the URI instead of a header.
    let host = header_str(headers, header::HOST).or_else(|| authority.map(|a| a.as_str()));
    if let Some(host) = host {
        info = info.with_host(host);
    }
    info
}

/// Extractor for the bound request context.
///
/// Rejects with `500` when the request was not bound, which happens on
/// bypassed paths or when [`TenancyLayer`] is missing.
///
/// ```rust,ignore
/// async fn handler(Tenancy(ctx): Tenancy<PgHandle>) -> String {
///     ctx.tenant_id().to_string()
/// }
/// ```
pub struct Tenancy<H>(pub Arc<RequestContext<H>>);

impl<H> Clone for Tenancy<H> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S, H> FromRequestParts<S> for Tenancy<H>
where
    S: Send + Sync,
    H: Send + Sync + 'static,
{
    type Rejection = TenancyRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<RequestContext<H>>>()
            .cloned()
            .map(Tenancy)
            .ok_or_else(unbound)
    }
}

/// Extractor for the bound tenant alone.
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Arc<Tenant>);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = TenancyRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<Tenant>>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(unbound)
    }
}

fn unbound() -> TenancyRejection {
    TenancyError::internal("request is not bound to a tenant").into()
}

/// Answer with the rejection for an error, for handlers that fail after binding.
pub fn reject(error: TenancyError) -> Response {
    TenancyRejection::from(error).into_response()
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        CurrentTenant, Tenancy, TenancyAxumError, TenancyLayer, TenancyRejection, TenancyService,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitos_tenancy::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_info_prefers_header_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_static("t1"));
        headers.insert(header::HOST, HeaderValue::from_static("rowgym.fitos.app"));

        let info = request_info("/classes", &headers, None, &BinderConfig::default());
        assert_eq!(info.tenant_id.as_deref(), Some("t1"));
        assert_eq!(info.host.as_deref(), Some("rowgym.fitos.app"));
        assert_eq!(info.path, "/classes");
    }

    #[test]
    fn test_request_info_falls_back_to_authority() {
        let uri: http::Uri = "https://schema.example/members".parse().unwrap();
        let config = BinderConfig::default();
        let info = request_info(uri.path(), &HeaderMap::new(), uri.authority(), &config);
        assert_eq!(info.tenant_id, None);
        assert_eq!(info.host.as_deref(), Some("schema.example"));
    }

    #[test]
    fn test_custom_tenant_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gym", HeaderValue::from_static("t4"));
        let config = BinderConfig::default().with_tenant_header("X-Gym");
        let info = request_info("/", &headers, None, &config);
        assert_eq!(info.tenant_id.as_deref(), Some("t4"));
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(header_name("x-tenant-id").is_ok());
        assert!(matches!(header_name("bad header"), Err(TenancyAxumError::InvalidHeaderName(_))));
    }

    #[test]
    fn test_rejection_status() {
        let cases = [
            (TenancyError::not_found_by_id("t9"), StatusCode::NOT_FOUND),
            (TenancyError::not_active("t3", "suspended"), StatusCode::FORBIDDEN),
            (TenancyError::capacity_exceeded("pool", 2), StatusCode::SERVICE_UNAVAILABLE),
            (TenancyError::provisioning("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(reject(err).status(), status);
        }
    }

    #[test]
    fn test_unavailable_sets_retry_after() {
        let response = reject(TenancyError::capacity_exceeded("pool", 2));
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
        let response = reject(TenancyError::not_found_by_id("t9"));
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_unbound_is_internal() {
        assert_eq!(unbound().error().code, ErrorCode::Internal);
    }
}
