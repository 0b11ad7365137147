//! Integration tests for request routing across the three isolation strategies.
//!
//! These tests drive the binder of a fully assembled router with the
//! in-memory connector and check the routing guarantees end to end.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fitos_router::tenancy::tenant::memory::{MemoryConnector, MemoryTarget};
use fitos_router::tenancy::tenant::{
    BindOutcome, DbStrategy, ProviderKind, ProvisionConfig, RequestInfo, StaticTenantStore, Tenant,
    TenantId, TenantRouter, TenantStatus, wait_all,
};
use fitos_router::tenancy::{ErrorCode, FailureOutcome};
use pretty_assertions::assert_eq;

fn store() -> StaticTenantStore {
    StaticTenantStore::with_tenants([
        Tenant::new("T1", "Row Gym").with_strategy(DbStrategy::RowLevel),
        Tenant::new("T2-acme", "Acme Fitness")
            .with_subdomain("acme")
            .with_strategy(DbStrategy::SchemaLevel),
        Tenant::new("T3", "Closed Gym")
            .with_subdomain("closed")
            .with_status(TenantStatus::Suspended)
            .with_strategy(DbStrategy::DatabaseLevel),
        Tenant::new("T4", "Big Gym").with_strategy(DbStrategy::DatabaseLevel),
        Tenant::new("T5", "Quiet Gym").with_status(TenantStatus::Inactive),
    ])
}

fn total_connects(connector: &MemoryConnector) -> usize {
    connector.shared_calls() + connector.schema_calls() + connector.dedicated_calls()
}

fn router(connector: &Arc<MemoryConnector>) -> TenantRouter<MemoryConnector> {
    TenantRouter::builder(Arc::clone(connector), Arc::new(store()))
        .build()
        .expect("router builds with default limits")
}

/// Scenario 1: explicit id of an active row-level tenant gets the shared handle.
#[tokio::test]
async fn test_explicit_id_row_level_gets_shared_handle() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    let ctx = router
        .binder()
        .bind(&RequestInfo::new("/classes").with_tenant_id("T1"))
        .await
        .unwrap()
        .into_context()
        .unwrap();

    assert_eq!(ctx.tenant_id().as_str(), "T1");
    assert_eq!(ctx.handle.kind(), ProviderKind::Shared);
    assert_eq!(ctx.handle.target(), &MemoryTarget::Shared);
    assert_eq!(connector.shared_calls(), 1);
}

/// Scenario 2: host resolves to a schema-level tenant scoped to its schema.
#[tokio::test]
async fn test_host_schema_level_gets_schema_handle() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    let ctx = router
        .binder()
        .bind(&RequestInfo::new("/").with_host("acme.fitos.example"))
        .await
        .unwrap()
        .into_context()
        .unwrap();

    assert_eq!(ctx.tenant_id().as_str(), "T2-acme");
    assert_eq!(ctx.handle.schema_name().unwrap().as_str(), "tenant_T2_acme");
    assert_eq!(ctx.handle.target(), &MemoryTarget::Schema("tenant_T2_acme".into()));
}

/// Scenario 3: unrecognised host is not found and nothing is provisioned.
#[tokio::test]
async fn test_unknown_host_is_not_found() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    let err = router
        .binder()
        .bind(&RequestInfo::new("/").with_host("nobody.fitos.example"))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::TenantNotFound);
    assert_eq!(err.outcome(), FailureOutcome::NotFound);
    assert_eq!(err.outcome().status_code(), 404);
    assert_eq!(total_connects(&connector), 0);
}

/// Scenario 4: non-active tenants are forbidden before any provisioning.
#[tokio::test]
async fn test_non_active_tenants_are_forbidden() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    for request in [
        RequestInfo::new("/").with_tenant_id("T3"),
        RequestInfo::new("/").with_host("closed.fitos.example"),
        RequestInfo::new("/").with_tenant_id("T5"),
    ] {
        let err = router.binder().bind(&request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantNotActive);
        assert_eq!(err.outcome().status_code(), 403);
    }
    assert_eq!(total_connects(&connector), 0);
}

/// Scenario 5 at a larger scale: 50 concurrent requests for an uncached
/// database-level tenant cause one creation and share one handle.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_coalesce() {
    let connector = Arc::new(MemoryConnector::new().with_latency(Duration::from_millis(50)));
    let router = Arc::new(router(&connector));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                let ctx = router
                    .binder()
                    .bind(&RequestInfo::new("/").with_tenant_id("T4"))
                    .await
                    .unwrap()
                    .into_context()
                    .unwrap();
                ctx.handle.serial()
            })
        })
        .collect();

    let serials: HashSet<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(connector.dedicated_calls(), 1);
    assert_eq!(serials.len(), 1);
}

/// Concurrent requests for a failing tenant all see the same error.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failure_is_shared() {
    let connector = Arc::new(MemoryConnector::new().with_latency(Duration::from_millis(50)));
    connector.fail_for("T4");
    let router = Arc::new(router(&connector));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .binder()
                    .bind(&RequestInfo::new("/").with_tenant_id("T4"))
                    .await
                    .unwrap_err()
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let err = result.unwrap();
        assert_eq!(err.code, ErrorCode::ProvisioningFailed);
        assert_eq!(err.tenant_id.as_deref(), Some("T4"));
    }
    assert_eq!(connector.dedicated_calls(), 1);

    // The failure leaves nothing behind; the next attempt provisions again.
    connector.recover("T4");
    let outcome = router
        .binder()
        .bind(&RequestInfo::new("/").with_tenant_id("T4"))
        .await
        .unwrap();
    assert!(matches!(outcome, BindOutcome::Bound(_)));
    assert_eq!(connector.dedicated_calls(), 2);
}

/// An idle schema handle is evicted and the next request re-provisions an
/// equivalent one.
#[tokio::test(start_paused = true)]
async fn test_idle_schema_handle_is_reprovisioned() {
    let connector = Arc::new(MemoryConnector::new());
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store()))
        .schema_config(
            ProvisionConfig::builder()
                .idle_timeout(Duration::from_secs(60))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let request = RequestInfo::new("/").with_tenant_id("T2-acme");

    let first = router.binder().bind(&request).await.unwrap().into_context().unwrap();
    let first_serial = first.handle.serial();
    let first_target = first.handle.target().clone();
    let closed = first.handle.closed_flag();
    drop(first);

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = router.sweep_idle().await;
    assert_eq!(report.handles_closed, 1);
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));

    let second = router.binder().bind(&request).await.unwrap().into_context().unwrap();
    assert_ne!(second.handle.serial(), first_serial);
    assert_eq!(second.handle.target(), &first_target);
    assert_eq!(connector.schema_calls(), 2);
}

/// A handle in use survives the idle sweep.
#[tokio::test(start_paused = true)]
async fn test_sweep_skips_handles_in_use() {
    let connector = Arc::new(MemoryConnector::new());
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store()))
        .pool_config(
            ProvisionConfig::builder()
                .idle_timeout(Duration::from_secs(60))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let held = router
        .binder()
        .bind(&RequestInfo::new("/").with_tenant_id("T4"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(router.sweep_idle().await.handles_closed, 0);
    assert_eq!(connector.close_calls(), 0);
    drop(held);
}

/// An explicit id wins over a host naming another tenant.
#[tokio::test]
async fn test_explicit_id_beats_host() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    let ctx = router
        .binder()
        .bind(&RequestInfo::new("/").with_tenant_id("T4").with_host("acme.fitos.example"))
        .await
        .unwrap()
        .into_context()
        .unwrap();
    assert_eq!(ctx.tenant_id().as_str(), "T4");
    assert_eq!(ctx.handle.kind(), ProviderKind::Dedicated);

    // An unknown explicit id does not fall back to the host.
    let err = router
        .binder()
        .bind(&RequestInfo::new("/").with_tenant_id("T9").with_host("acme.fitos.example"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TenantNotFound);
}

/// Suspending a tenant through invalidation closes its pool and forbids it.
#[tokio::test]
async fn test_suspension_closes_pool() {
    let connector = Arc::new(MemoryConnector::new());
    let store = store();
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store.clone()))
        .build()
        .unwrap();
    let request = RequestInfo::new("/").with_tenant_id("T4");

    drop(router.binder().bind(&request).await.unwrap());
    store.upsert(
        Tenant::new("T4", "Big Gym")
            .with_status(TenantStatus::Suspended)
            .with_strategy(DbStrategy::DatabaseLevel),
    );
    let retiring = router.invalidate_tenant(&TenantId::new("T4"));
    assert_eq!(retiring.len(), 1);
    wait_all(retiring).await;
    assert_eq!(connector.close_calls(), 1);

    let err = router.binder().bind(&request).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TenantNotActive);
    assert_eq!(connector.dedicated_calls(), 1);
}

/// A suspended tenant is forbidden at once even while an earlier request
/// still holds its pool.
#[tokio::test]
async fn test_suspension_is_prompt_while_pool_in_use() {
    let connector = Arc::new(MemoryConnector::new());
    let store = store();
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store.clone()))
        .build()
        .unwrap();
    let request = RequestInfo::new("/").with_tenant_id("T4");

    let held = router.binder().bind(&request).await.unwrap();
    store.upsert(
        Tenant::new("T4", "Big Gym")
            .with_status(TenantStatus::Suspended)
            .with_strategy(DbStrategy::DatabaseLevel),
    );
    let retiring = router.invalidate_tenant(&TenantId::new("T4"));

    let err = tokio::time::timeout(Duration::from_secs(2), router.binder().bind(&request))
        .await
        .expect("suspended tenant is rejected without waiting")
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TenantNotActive);
    assert_eq!(connector.close_calls(), 0);

    drop(held);
    wait_all(retiring).await;
    assert_eq!(connector.close_calls(), 1);
}

/// Opening the shared handle is bounded by its deadline.
#[tokio::test(start_paused = true)]
async fn test_shared_handle_open_times_out() {
    let connector = Arc::new(MemoryConnector::new().with_latency(Duration::from_secs(3600)));
    let router = TenantRouter::builder(Arc::clone(&connector), Arc::new(store()))
        .shared_config(
            ProvisionConfig::builder()
                .provision_timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(60),
        router.binder().bind(&RequestInfo::new("/").with_tenant_id("T1")),
    )
    .await
    .expect("bind gives up at the provisioning deadline")
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProvisioningTimeout);
    assert_eq!(err.outcome(), FailureOutcome::Internal);
}

/// After shutdown no request is handed a closed handle.
#[tokio::test]
async fn test_no_handle_served_after_shutdown() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    for id in ["T1", "T2-acme", "T4"] {
        let request = RequestInfo::new("/").with_tenant_id(id);
        drop(router.binder().bind(&request).await.unwrap());
    }
    router.shutdown().await;

    for id in ["T1", "T2-acme", "T4"] {
        let err = router
            .binder()
            .bind(&RequestInfo::new("/").with_tenant_id(id))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::HandleClosed);
    }
}

/// The health prefix bypasses resolution entirely.
#[tokio::test]
async fn test_health_bypass() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    let outcome = router
        .binder()
        .bind(&RequestInfo::new("/health/ready").with_tenant_id("T9"))
        .await
        .unwrap();
    assert!(matches!(outcome, BindOutcome::Bypassed));
}

/// Shutdown closes every cached handle.
#[tokio::test]
async fn test_shutdown_closes_all_handles() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(&connector);

    for id in ["T1", "T2-acme", "T4"] {
        drop(router.binder().bind(&RequestInfo::new("/").with_tenant_id(id)).await.unwrap());
    }
    router.shutdown().await;
    assert_eq!(connector.close_calls(), 3);
}
