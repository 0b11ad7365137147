//! Error types for PostgreSQL operations.

use fitos_tenancy::TenancyError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Pool could not be built.
    #[error("pool build error: {0}")]
    Build(#[from] deadpool_postgres::BuildError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The tenant schema does not exist.
    #[error("schema '{0}' does not exist")]
    SchemaMissing(String),

    /// A stored row could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Whether the server could not be reached or dropped the connection.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// SQLSTATE of the underlying server error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }
}

impl From<PgError> for TenancyError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => TenancyError::config(msg),
            PgError::Build(e) => {
                TenancyError::config(format!("cannot build pool: {}", e)).with_source(e)
            }
            other => TenancyError::provisioning(other.to_string()).with_source(other),
        }
    }
}
