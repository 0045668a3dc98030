//! Values used when a setting is left unset.

use std::time::Duration;

/// Superuser created by `initdb` when no override is configured.
pub const DEFAULT_SUPERUSER: &str = "postgres";

/// Database every fresh cluster exposes.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Host name handed out in connection descriptors.
pub const DEFAULT_HOST: &str = "localhost";

/// Time allowed for the server to report readiness.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a graceful stop before the postmaster is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Number of freshly allocated ports tried before giving up on conflicts.
pub const DEFAULT_MAX_PORT_ATTEMPTS: u32 = 10;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for test output.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}
