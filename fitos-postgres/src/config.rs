//! Connection settings for one PostgreSQL database.
//!
//! A [`PgConfig`] is parsed once from the platform's database URL. The
//! connector derives the per-tenant variants from it: another database on
//! the same server for dedicated tenants, or the same database with a pinned
//! `search_path` for schema tenants.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fitos_tenancy::tenant::SchemaName;
use url::Url;

use crate::error::{PgError, PgResult};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_APPLICATION_NAME: &str = "fitos-router";

/// Where and how to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
    pub connect_timeout: Duration,
    /// Applied to every statement on the connection.
    pub statement_timeout: Option<Duration>,
    /// Shown in `pg_stat_activity`.
    pub application_name: Option<String>,
    /// `search_path` pinned for the lifetime of every connection.
    pub search_path: Option<String>,
}

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl FromStr for SslMode {
    type Err = PgError;

    fn from_str(value: &str) -> PgResult<Self> {
        match value {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            other => Err(PgError::config(format!("unsupported sslmode {:?}", other))),
        }
    }
}

impl From<SslMode> for tokio_postgres::config::SslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => Self::Disable,
            SslMode::Prefer => Self::Prefer,
            SslMode::Require => Self::Require,
        }
    }
}

impl PgConfig {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Recognised query parameters are `sslmode` (`disable`, `prefer`,
    /// `require`), `connect_timeout` (seconds), `statement_timeout`
    /// (milliseconds) and `application_name`. Anything else is rejected so
    /// that a typo does not silently fall back to a default.
    pub fn from_url(url: &str) -> PgResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;
        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(PgError::config(format!("unsupported URL scheme {:?}", parsed.scheme())));
        }

        let database = parsed.path().trim_start_matches('/');
        let mut config = Self {
            host: parsed
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| PgError::config("database URL has no host"))?
                .to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            database: match database {
                "" => return Err(PgError::config("database URL has no database name")),
                name => name.to_string(),
            },
            user: match parsed.username() {
                "" => DEFAULT_USER.to_string(),
                name => name.to_string(),
            },
            password: parsed.password().map(str::to_string),
            ssl_mode: SslMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: None,
            application_name: Some(DEFAULT_APPLICATION_NAME.to_string()),
            search_path: None,
        };
        for (key, value) in parsed.query_pairs() {
            config.apply_param(&key, &value)?;
        }
        Ok(config)
    }

    fn apply_param(&mut self, key: &str, value: &str) -> PgResult<()> {
        let number = |what: &str| -> PgResult<u64> {
            value.parse().map_err(|_| {
                PgError::config(format!("{} must be a whole number, got {:?}", what, value))
            })
        };
        match key {
            "sslmode" => self.ssl_mode = value.parse()?,
            "connect_timeout" => self.connect_timeout = Duration::from_secs(number(key)?),
            "statement_timeout" => {
                self.statement_timeout = Some(Duration::from_millis(number(key)?))
            }
            "application_name" => self.application_name = Some(value.to_string()),
            other => return Err(PgError::config(format!("unsupported URL parameter {:?}", other))),
        }
        Ok(())
    }

    /// The same server and credentials, pointed at another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            search_path: None,
            ..self.clone()
        }
    }

    /// The same database with the search path pinned to a tenant schema.
    pub fn with_schema(&self, schema: &SchemaName) -> Self {
        Self {
            search_path: Some(format!("{},public", schema.quoted())),
            ..self.clone()
        }
    }

    /// Startup `options` sent to the server, if any.
    ///
    /// Values set here apply to every connection for its whole lifetime, so
    /// pooled connections cannot drift to another schema.
    pub fn startup_options(&self) -> Option<String> {
        let mut options = Vec::new();
        if let Some(path) = &self.search_path {
            options.push(format!("-c search_path={}", path));
        }
        if let Some(timeout) = self.statement_timeout {
            options.push(format!("-c statement_timeout={}", timeout.as_millis()));
        }
        (!options.is_empty()).then(|| options.join(" "))
    }

    /// Driver settings for this configuration.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .ssl_mode(self.ssl_mode.into())
            .connect_timeout(self.connect_timeout);
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(name) = &self.application_name {
            config.application_name(name);
        }
        if let Some(options) = self.startup_options() {
            config.options(&options);
        }
        config
    }
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl_mode", &self.ssl_mode)
            .field("search_path", &self.search_path)
            .finish_non_exhaustive()
    }
}
