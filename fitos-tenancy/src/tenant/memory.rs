//! An in-memory [`Connector`] for tests, fixtures and local development.
//!
//! Handles carry a serial number and a description of what they point at, so
//! callers can tell whether two requests received the same handle. Call
//! counters, artificial latency and per-tenant failures make provisioning
//! behaviour observable.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{TenancyError, TenancyResult};

use super::context::Tenant;
use super::provider::Connector;
use super::strategy::SchemaName;

/// What a [`MemoryHandle`] is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryTarget {
    /// The shared database.
    Shared,
    /// A schema in the shared database.
    Schema(String),
    /// A tenant's own database.
    Database(String),
}

/// Handle produced by [`MemoryConnector`].
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    serial: u64,
    target: MemoryTarget,
    closed: Arc<AtomicBool>,
}

impl MemoryHandle {
    /// Unique number of the underlying connection.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// What the handle points at.
    pub fn target(&self) -> &MemoryTarget {
        &self.target
    }

    /// Whether the connector has closed this handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The close flag, observable after the handle is dropped.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

/// In-memory connector with instrumentation.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    latency: Duration,
    next_serial: AtomicU64,
    shared_calls: AtomicUsize,
    schema_calls: AtomicUsize,
    dedicated_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_shared: AtomicBool,
    failing: RwLock<HashSet<String>>,
}

impl MemoryConnector {
    /// Create a connector that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every connect by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make connects for a tenant fail until [`recover`](Self::recover).
    pub fn fail_for(&self, tenant_id: impl Into<String>) {
        self.failing.write().insert(tenant_id.into());
    }

    /// Stop failing connects for a tenant.
    pub fn recover(&self, tenant_id: &str) {
        self.failing.write().remove(tenant_id);
    }

    /// Toggle failure of the shared handle.
    pub fn fail_shared(&self, fail: bool) {
        self.fail_shared.store(fail, Ordering::SeqCst);
    }

    /// Number of shared connects attempted.
    pub fn shared_calls(&self) -> usize {
        self.shared_calls.load(Ordering::SeqCst)
    }

    /// Number of schema connects attempted.
    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    /// Number of dedicated connects attempted.
    pub fn dedicated_calls(&self) -> usize {
        self.dedicated_calls.load(Ordering::SeqCst)
    }

    /// Number of handles closed.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` handles have been closed.
    pub async fn closed_at_least(&self, count: usize) {
        while self.close_calls() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn open(
        &self,
        tenant: Option<&Tenant>,
        target: MemoryTarget,
    ) -> TenancyResult<MemoryHandle> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(tenant) = tenant {
            if self.failing.read().contains(tenant.id.as_str()) {
                return Err(TenancyError::provisioning(format!(
                    "connection to {:?} refused",
                    target
                ))
                .with_tenant(&tenant.id));
            }
        }
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(serial, target = ?target, "Opened in-memory handle");
        Ok(MemoryHandle {
            serial,
            target,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryHandle;

    async fn connect_shared(&self) -> TenancyResult<MemoryHandle> {
        self.shared_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_shared.load(Ordering::SeqCst) {
            return Err(TenancyError::provisioning("shared database unreachable"));
        }
        self.open(None, MemoryTarget::Shared).await
    }

    async fn connect_schema(
        &self,
        tenant: &Tenant,
        schema: &SchemaName,
    ) -> TenancyResult<MemoryHandle> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.open(Some(tenant), MemoryTarget::Schema(schema.as_str().to_string()))
            .await
    }

    async fn connect_dedicated(&self, tenant: &Tenant) -> TenancyResult<MemoryHandle> {
        self.dedicated_calls.fetch_add(1, Ordering::SeqCst);
        self.open(Some(tenant), MemoryTarget::Database(tenant.id.to_string()))
            .await
    }

    async fn close(&self, handle: MemoryHandle) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        handle.closed.store(true, Ordering::SeqCst);
        debug!(serial = handle.serial, "Closed in-memory handle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::context::TenantId;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_serials_are_unique() {
        let connector = MemoryConnector::new();
        let tenant = Tenant::new("t1", "Acme");
        let a = connector.connect_dedicated(&tenant).await.unwrap();
        let b = connector.connect_dedicated(&tenant).await.unwrap();
        assert_ne!(a.serial(), b.serial());
        assert_eq!(connector.dedicated_calls(), 2);
    }

    #[tokio::test]
    async fn test_fail_and_recover() {
        let connector = MemoryConnector::new();
        let tenant = Tenant::new("t1", "Acme");
        let schema = SchemaName::derive(&TenantId::new("t1")).unwrap();

        connector.fail_for("t1");
        assert!(connector.connect_schema(&tenant, &schema).await.is_err());
        connector.recover("t1");
        assert!(connector.connect_schema(&tenant, &schema).await.is_ok());
        assert_eq!(connector.schema_calls(), 2);
    }

    #[tokio::test]
    async fn test_close_marks_handle() {
        let connector = MemoryConnector::new();
        let handle = connector.connect_shared().await.unwrap();
        let flag = handle.closed_flag();
        connector.close(handle).await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(connector.close_calls(), 1);
    }
}
