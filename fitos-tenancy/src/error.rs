//! Error types for tenant routing with stable codes and HTTP outcomes.
//!
//! Every failure the routing layer can produce is a [`TenancyError`]. Each
//! error carries an [`ErrorCode`] for programmatic handling and maps onto a
//! [`FailureOutcome`], which is all the outside world ever sees.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: T{category}{number}
//! - 1xxx: Resolution errors (not found, not active, invalid id)
//! - 2xxx: Provisioning errors (failed, timeout, capacity, closed)
//! - 3xxx: Directory errors (tenant store unavailable)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use fitos_tenancy::{ErrorCode, FailureOutcome, TenancyError};
//!
//! let err = TenancyError::not_found_by_host("unknown.fitos.example");
//! assert_eq!(err.code, ErrorCode::TenantNotFound);
//! assert_eq!(err.outcome(), FailureOutcome::NotFound);
//! assert_eq!(err.outcome().status_code(), 404);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type for tenant routing operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Resolution errors (1xxx)
    /// No tenant matched the id or host (T1001).
    TenantNotFound = 1001,
    /// Tenant exists but its status forbids routing (T1002).
    TenantNotActive = 1002,
    /// Tenant id is outside the routable alphabet (T1003).
    InvalidTenantId = 1003,

    // Provisioning errors (2xxx)
    /// Creating a schema client or dedicated pool failed (T2001).
    ProvisioningFailed = 2001,
    /// Provisioning did not finish within its deadline (T2002).
    ProvisioningTimeout = 2002,
    /// Every cache slot is busy and nothing can be evicted (T2003).
    CapacityExceeded = 2003,
    /// The handle was evicted before it could be leased (T2004).
    HandleClosed = 2004,

    // Directory errors (3xxx)
    /// The tenant store itself failed (T3001).
    DirectoryUnavailable = 3001,

    // Configuration errors (7xxx)
    /// Invalid configuration (T7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (T7002).
    MissingConfiguration = 7002,

    // Internal errors (9xxx)
    /// Internal error (T9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1001").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantNotFound => "Tenant not found",
            Self::TenantNotActive => "Tenant is not active",
            Self::InvalidTenantId => "Invalid tenant identifier",
            Self::ProvisioningFailed => "Database handle provisioning failed",
            Self::ProvisioningTimeout => "Database handle provisioning timed out",
            Self::CapacityExceeded => "Tenant handle capacity exceeded",
            Self::HandleClosed => "Database handle was closed",
            Self::DirectoryUnavailable => "Tenant directory unavailable",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::Internal => "Internal error",
        }
    }

    /// Get the outcome reported to the caller for this code.
    pub fn outcome(&self) -> FailureOutcome {
        match self {
            Self::TenantNotFound => FailureOutcome::NotFound,
            Self::TenantNotActive => FailureOutcome::Forbidden,
            Self::CapacityExceeded => FailureOutcome::Unavailable,
            Self::InvalidTenantId
            | Self::ProvisioningFailed
            | Self::ProvisioningTimeout
            | Self::HandleClosed
            | Self::DirectoryUnavailable
            | Self::InvalidConfiguration
            | Self::MissingConfiguration
            | Self::Internal => FailureOutcome::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What the caller of a routed request is told about a failure.
///
/// Internal detail never crosses this boundary; only the status and the
/// generic message do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureOutcome {
    /// No such tenant (404).
    NotFound,
    /// Tenant exists but may not be served (403).
    Forbidden,
    /// Temporarily out of capacity, retry later (503).
    Unavailable,
    /// Anything else (500).
    Internal,
}

impl FailureOutcome {
    /// HTTP status code for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    /// Message safe to return to clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound => "Tenant not found",
            Self::Forbidden => "Tenant is not active",
            Self::Unavailable => "Service temporarily unavailable, please retry",
            Self::Internal => "Internal server error",
        }
    }
}

/// Errors that can occur while routing a request to a tenant.
///
/// The error is cheap to clone so that every request coalesced onto one
/// provisioning attempt receives the same failure.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct TenancyError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// The tenant involved, when known.
    pub tenant_id: Option<String>,
    /// The source error (if any).
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TenancyError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tenant_id: None,
            source: None,
        }
    }

    /// Attach the tenant this error concerns.
    pub fn with_tenant(mut self, tenant_id: impl fmt::Display) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// No tenant has the given id.
    pub fn not_found_by_id(tenant_id: impl fmt::Display) -> Self {
        let id = tenant_id.to_string();
        Self::new(ErrorCode::TenantNotFound, format!("No tenant with id '{}'", id)).with_tenant(id)
    }

    /// No tenant serves the given host.
    pub fn not_found_by_host(host: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::TenantNotFound,
            format!("No tenant serves host '{}'", host.into()),
        )
    }

    /// The request carried neither a tenant id nor a host.
    pub fn unidentified() -> Self {
        Self::new(
            ErrorCode::TenantNotFound,
            "Request carries neither a tenant id nor a host",
        )
    }

    /// The tenant exists but its status forbids routing.
    pub fn not_active(tenant_id: impl fmt::Display, status: impl fmt::Display) -> Self {
        let id = tenant_id.to_string();
        Self::new(
            ErrorCode::TenantNotActive,
            format!("Tenant '{}' is {}", id, status),
        )
        .with_tenant(id)
    }

    /// The tenant id cannot be mapped to an isolated namespace.
    pub fn invalid_tenant_id(tenant_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        let id = tenant_id.to_string();
        Self::new(
            ErrorCode::InvalidTenantId,
            format!("Tenant id '{}' is not routable: {}", id, reason.into()),
        )
        .with_tenant(id)
    }

    /// Creating a handle failed.
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProvisioningFailed, message)
    }

    /// Provisioning for the given cache key did not finish in time.
    pub fn provisioning_timeout(key: impl fmt::Display, timeout: Duration) -> Self {
        Self::new(
            ErrorCode::ProvisioningTimeout,
            format!(
                "Provisioning '{}' timed out after {}ms",
                key,
                timeout.as_millis()
            ),
        )
    }

    /// The cache is full of handles that are in use or still provisioning.
    pub fn capacity_exceeded(kind: &str, max_entries: usize) -> Self {
        Self::new(
            ErrorCode::CapacityExceeded,
            format!(
                "All {} {} slots are busy; retry shortly",
                max_entries, kind
            ),
        )
    }

    /// The handle for the given key was evicted mid-acquisition.
    pub fn handle_closed(key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::HandleClosed,
            format!("Handle for '{}' was closed before it could be used", key),
        )
    }

    /// The tenant store failed.
    pub fn directory_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DirectoryUnavailable,
            format!("Tenant directory unavailable: {}", message.into()),
        )
    }

    /// Configuration is invalid.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// A required configuration value is missing.
    pub fn missing_config(key: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MissingConfiguration,
            format!("Missing configuration value '{}'", key.into()),
        )
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message.into()))
    }

    // ============== Error Checks ==============

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::TenantNotFound
    }

    /// Check if this is a forbidden (inactive tenant) error.
    pub fn is_not_active(&self) -> bool {
        self.code == ErrorCode::TenantNotActive
    }

    /// Check if this is a provisioning error of any kind.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ProvisioningFailed
                | ErrorCode::ProvisioningTimeout
                | ErrorCode::CapacityExceeded
                | ErrorCode::HandleClosed
        )
    }

    /// Check if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ProvisioningFailed
                | ErrorCode::ProvisioningTimeout
                | ErrorCode::CapacityExceeded
                | ErrorCode::HandleClosed
                | ErrorCode::DirectoryUnavailable
        )
    }

    /// The outcome reported to the caller.
    pub fn outcome(&self) -> FailureOutcome {
        self.code.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::TenantNotFound.code(), "T1001");
        assert_eq!(ErrorCode::ProvisioningFailed.code(), "T2001");
        assert_eq!(ErrorCode::DirectoryUnavailable.code(), "T3001");
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(TenancyError::not_found_by_id("t1").outcome().status_code(), 404);
        assert_eq!(
            TenancyError::not_active("t1", "suspended").outcome().status_code(),
            403
        );
        assert_eq!(TenancyError::provisioning("boom").outcome().status_code(), 500);
        assert_eq!(
            TenancyError::directory_unavailable("down").outcome().status_code(),
            500
        );
        assert_eq!(
            TenancyError::capacity_exceeded("pool", 4).outcome().status_code(),
            503
        );
    }

    #[test]
    fn test_directory_failure_is_not_not_found() {
        let err = TenancyError::directory_unavailable("connection refused");
        assert!(!err.is_not_found());
        assert_eq!(err.outcome(), FailureOutcome::Internal);
    }

    #[test]
    fn test_display_carries_code() {
        let err = TenancyError::provisioning_timeout("tenant_t4", Duration::from_millis(250));
        let text = err.to_string();
        assert!(text.starts_with("[T2002]"));
        assert!(text.contains("250ms"));
    }

    #[test]
    fn test_source_survives_clone() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TenancyError::provisioning("pool").with_source(io).with_tenant("t9");
        let cloned = err.clone();
        assert!(std::error::Error::source(&cloned).is_some());
        assert_eq!(cloned.tenant_id.as_deref(), Some("t9"));
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = TenancyError::provisioning("password authentication failed for user fitos");
        assert!(!err.outcome().public_message().contains("password"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(TenancyError::capacity_exceeded("pool", 1).is_retryable());
        assert!(TenancyError::provisioning_timeout("k", Duration::from_secs(1)).is_retryable());
        assert!(!TenancyError::not_found_by_id("x").is_retryable());
        assert!(!TenancyError::not_active("x", "inactive").is_retryable());
    }
}
