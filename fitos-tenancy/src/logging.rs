//! Logging setup for the tenant routing layer.
//!
//! Output is controlled by environment variables so that operators can turn
//! on routing diagnostics without recompiling.
//!
//! # Environment Variables
//!
//! - `FITOS_DEBUG=true` or `FITOS_DEBUG=1` - Enable debug logging
//! - `FITOS_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `FITOS_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use fitos_tenancy::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//! ```
//!
//! Within the crate the standard tracing macros are used with structured
//! fields:
//!
//! ```rust,ignore
//! use tracing::{debug, error, info};
//!
//! debug!(tenant_id = %tenant.id, stage = "resolving", "Resolving tenant");
//! info!(key = %key, idle_ms = idle.as_millis() as u64, "Evicting idle handle");
//! error!(tenant_id = %id, error = %e, "Provisioning failed");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `FITOS_DEBUG`.
///
/// Returns `true` if `FITOS_DEBUG` is set to "true", "1", or "yes" (case-insensitive).
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("FITOS_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn fallback_level() -> &'static str {
    if is_debug_enabled() { "debug" } else { "warn" }
}

/// Get the configured log level from `FITOS_LOG_LEVEL`.
///
/// Defaults to "debug" if `FITOS_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    match env::var("FITOS_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback_level(),
        },
        Err(_) => fallback_level(),
    }
}

/// Get the configured log format from `FITOS_LOG_FORMAT`.
///
/// Defaults to "json" for structured logging.
pub fn get_log_format() -> &'static str {
    env::var("FITOS_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Directive string handed to `EnvFilter` for the given level.
pub fn filter_directives(level: &str) -> String {
    ["fitos_router", "fitos_tenancy", "fitos_postgres", "fitos_axum"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging.
///
/// This should be called once at application startup. Subsequent calls are
/// no-ops. Without the `tracing-subscriber` feature nothing is installed and
/// the host application is expected to bring its own subscriber.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("FITOS_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(filter_directives(level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            match get_log_format() {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "compact" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().compact())
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().pretty())
                        .init();
                }
            }

            tracing::info!(
                level = level,
                format = get_log_format(),
                "FitOS tenancy logging initialized"
            );
        }
    });
}

/// Initialize logging with a specific level.
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call this early in your program before
/// spawning threads.
pub fn init_with_level(level: &str) {
    // SAFETY: only called at program startup before threads are spawned.
    unsafe {
        env::set_var("FITOS_LOG_LEVEL", level);
    }
    init();
}

/// Initialize debug logging, equivalent to `FITOS_DEBUG=true` plus [`init`].
///
/// # Safety
///
/// Same caveat as [`init_with_level`].
pub fn init_debug() {
    // SAFETY: only called at program startup before threads are spawned.
    unsafe {
        env::set_var("FITOS_DEBUG", "true");
    }
    init();
}
