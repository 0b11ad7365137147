//! End-to-end tests of the tenancy layer in an axum router.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::routing::get;
use http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use fitos_axum::{CurrentTenant, Tenancy, TenancyLayer};
use fitos_tenancy::tenant::memory::{MemoryConnector, MemoryHandle};
use fitos_tenancy::tenant::task_local::current_tenant_id;
use fitos_tenancy::tenant::{
    DbStrategy, ProvisionConfig, RequestInfo, StaticTenantStore, Tenant, TenantId, TenantRouter,
    TenantStatus, wait_all,
};

struct App {
    app: Router,
    router: TenantRouter<MemoryConnector>,
    connector: Arc<MemoryConnector>,
}

async fn whoami(Tenancy(ctx): Tenancy<MemoryHandle>) -> String {
    let task = current_tenant_id().map(|id| id.into_inner()).unwrap_or_default();
    format!("{}|{}|{}", ctx.tenant_id(), ctx.handle.kind(), task)
}

async fn name(CurrentTenant(tenant): CurrentTenant) -> String {
    tenant.name.clone()
}

async fn health() -> &'static str {
    "ok"
}

async fn health_with_tenant(Tenancy(ctx): Tenancy<MemoryHandle>) -> String {
    ctx.tenant_id().to_string()
}

fn app() -> App {
    let connector = Arc::new(MemoryConnector::new());
    let store = StaticTenantStore::with_tenants([
        Tenant::new("t1", "Row Gym")
            .with_subdomain("rowgym")
            .with_strategy(DbStrategy::RowLevel),
        Tenant::new("t2", "Schema Gym")
            .with_custom_domain("schema.example")
            .with_strategy(DbStrategy::SchemaLevel),
        Tenant::new("t3", "Closed Gym")
            .with_status(TenantStatus::Suspended)
            .with_strategy(DbStrategy::DatabaseLevel),
        Tenant::new("t4", "Big Gym").with_strategy(DbStrategy::DatabaseLevel),
        Tenant::new("t5", "Other Big Gym").with_strategy(DbStrategy::DatabaseLevel),
    ]);
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store))
        .pool_config(ProvisionConfig::builder().max_entries(1).build().unwrap())
        .build()
        .unwrap();

    let app = Router::new()
        .route("/whoami", get(whoami))
        .route("/name", get(name))
        .route("/health", get(health))
        .route("/health/tenant", get(health_with_tenant))
        .layer(TenancyLayer::for_router(&router).unwrap());

    App { app, router, connector }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get_with_host(path: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

fn get_with_id(path: &str, id: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-tenant-id", id)
        .body(Body::empty())
        .unwrap()
}

fn error_body(message: &str) -> Value {
    json!({ "success": false, "error": { "message": message } })
}

#[tokio::test]
async fn test_row_level_tenant_by_subdomain() {
    let App { app, connector, .. } = app();

    let (status, headers, body) = send(&app, get_with_host("/whoami", "rowgym.fitos.app")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "t1|shared|t1");
    assert_eq!(headers.get("x-tenant-id").unwrap(), "t1");
    assert_eq!(connector.shared_calls(), 1);
}

#[tokio::test]
async fn test_schema_tenant_by_custom_domain() {
    let App { app, connector, .. } = app();

    let (status, headers, body) = send(&app, get_with_host("/whoami", "schema.example:8443")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "t2|schema|t2");
    assert_eq!(headers.get("x-tenant-id").unwrap(), "t2");
    assert_eq!(connector.schema_calls(), 1);

    // Second request reuses the cached handle.
    send(&app, get_with_host("/whoami", "schema.example")).await;
    assert_eq!(connector.schema_calls(), 1);
}

#[tokio::test]
async fn test_explicit_header_wins_over_host() {
    let App { app, .. } = app();

    let request = Request::builder()
        .uri("/name")
        .header(header::HOST, "rowgym.fitos.app")
        .header("x-tenant-id", "t4")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Big Gym");
    assert_eq!(headers.get("x-tenant-id").unwrap(), "t4");
}

#[tokio::test]
async fn test_unknown_tenant_is_404() {
    let App { app, .. } = app();

    let (status, headers, body) = send(&app, get_with_id("/whoami", "t9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(headers.get("x-tenant-id").is_none());
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, error_body("Tenant not found"));
}

#[tokio::test]
async fn test_missing_identification_is_404() {
    let App { app, .. } = app();

    let request = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_suspended_tenant_is_403_without_provisioning() {
    let App { app, connector, .. } = app();

    let (status, _, body) = send(&app, get_with_id("/whoami", "t3")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, error_body("Tenant is not active"));
    assert_eq!(connector.dedicated_calls(), 0);
}

#[tokio::test]
async fn test_provisioning_failure_is_500_with_generic_message() {
    let App { app, connector, .. } = app();
    connector.fail_for("t4");

    let (status, _, body) = send(&app, get_with_id("/whoami", "t4")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, error_body("Internal server error"));
}

#[tokio::test]
async fn test_pool_capacity_is_503_with_retry_after() {
    let App { app, router, .. } = app();

    // Hold the only dedicated pool slot.
    let held = router
        .binder()
        .bind(&RequestInfo::new("/").with_tenant_id("t4"))
        .await
        .unwrap();

    let (status, headers, body) = send(&app, get_with_id("/whoami", "t5")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "1");
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], json!(false));

    // Once released, the idle pool is evicted to make room.
    drop(held);
    let (status, _, body) = send(&app, get_with_id("/whoami", "t5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "t5|dedicated|t5");
}

#[tokio::test]
async fn test_health_path_bypasses_routing() {
    let App { app, connector, .. } = app();

    let (status, headers, body) = send(&app, get_with_id("/health", "t9")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
    assert!(headers.get("x-tenant-id").is_none());
    assert_eq!(connector.shared_calls(), 0);

    // Handlers that need a tenant fail on bypassed paths.
    let (status, _, _) = send(&app, get_with_id("/health/tenant", "t1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_suspension_takes_effect_after_invalidation() {
    let connector = Arc::new(MemoryConnector::new());
    let store = StaticTenantStore::with_tenants([
        Tenant::new("t4", "Big Gym").with_strategy(DbStrategy::DatabaseLevel)
    ]);
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store.clone()))
        .build()
        .unwrap();
    let app = Router::new()
        .route("/whoami", get(whoami))
        .layer(TenancyLayer::for_router(&router).unwrap());

    let (status, _, _) = send(&app, get_with_id("/whoami", "t4")).await;
    assert_eq!(status, StatusCode::OK);

    store.upsert(
        Tenant::new("t4", "Big Gym")
            .with_status(TenantStatus::Suspended)
            .with_strategy(DbStrategy::DatabaseLevel),
    );
    let retiring = router.invalidate_tenant(&TenantId::new("t4"));

    let (status, _, _) = send(&app, get_with_id("/whoami", "t4")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    wait_all(retiring).await;
    assert_eq!(connector.close_calls(), 1);
}

#[tokio::test]
async fn test_lease_held_until_body_is_read() {
    let App {
        app,
        router,
        connector,
    } = app();

    let response = app
        .clone()
        .oneshot(get_with_id("/whoami", "t4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let retiring = router.invalidate_tenant(&TenantId::new("t4"));
    assert_eq!(retiring.len(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(connector.close_calls(), 0);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"t4|dedicated|t4");
    wait_all(retiring).await;
    assert_eq!(connector.close_calls(), 1);
}
