//! Layered settings for disposable PostgreSQL test clusters.
//!
//! Test suites rarely own a command line, so [`Settings`] is read from
//! `PGTEST_*` environment variables and an optional `.pgtest.toml` file via
//! `ortho_config`. Every field is optional; the accessors fall back to the
//! values in [`defaults`]. Programmatic configuration lives on
//! `pgtest::ClusterConfig`, which can be seeded from these settings.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_PORT_ATTEMPTS,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_TIMEOUT, DEFAULT_SUPERUSER, default_log_filter,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Program name handed to the loader in place of the harness argv.
const SYNTHETIC_PROGRAM: &str = "pgtest";

/// Settings shared by every cluster started in a process.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "PGTEST")]
pub struct Settings {
    /// Directory holding `initdb`, `pg_ctl` and `postgres`.
    pub bin_dir: Option<Utf8PathBuf>,
    /// Explicit `pg_ctl` executable; its directory must hold the other tools.
    pub pg_ctl: Option<Utf8PathBuf>,
    /// Fixed port. Disables the conflict retry loop.
    pub port: Option<u16>,
    /// Superuser created by `initdb`.
    pub superuser: Option<String>,
    /// Readiness timeout in milliseconds.
    pub startup_timeout_ms: Option<u64>,
    /// Graceful shutdown budget in milliseconds.
    pub shutdown_grace_ms: Option<u64>,
    /// Fresh ports tried before a conflict is surfaced.
    pub max_port_attempts: Option<u32>,
    /// `tracing` filter expression used by `pgtest::telemetry`.
    pub log_filter: Option<String>,
    /// Output format used by `pgtest::telemetry`.
    pub log_format: Option<LogFormat>,
}

impl Settings {
    /// Loads settings from the environment and configuration files only.
    ///
    /// The test harness's own arguments (`--nocapture`, filters) are never
    /// forwarded to the loader.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when a `PGTEST_*` variable or the
    /// configuration file holds a value of the wrong type.
    pub fn from_environment() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter([OsString::from(SYNTHETIC_PROGRAM)])
    }

    /// Configured binary directory, if any.
    #[must_use]
    pub fn bin_dir(&self) -> Option<&Utf8Path> {
        self.bin_dir.as_deref()
    }

    /// Configured `pg_ctl` override, if any.
    #[must_use]
    pub fn pg_ctl(&self) -> Option<&Utf8Path> {
        self.pg_ctl.as_deref()
    }

    /// Superuser name, falling back to [`DEFAULT_SUPERUSER`].
    #[must_use]
    pub fn superuser(&self) -> &str {
        self.superuser.as_deref().unwrap_or(DEFAULT_SUPERUSER)
    }

    /// Readiness timeout, falling back to [`DEFAULT_STARTUP_TIMEOUT`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout_ms
            .map_or(DEFAULT_STARTUP_TIMEOUT, Duration::from_millis)
    }

    /// Shutdown grace period, falling back to [`DEFAULT_SHUTDOWN_GRACE`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace_ms
            .map_or(DEFAULT_SHUTDOWN_GRACE, Duration::from_millis)
    }

    /// Port attempt bound, falling back to [`DEFAULT_MAX_PORT_ATTEMPTS`].
    #[must_use]
    pub fn max_port_attempts(&self) -> u32 {
        self.max_port_attempts.unwrap_or(DEFAULT_MAX_PORT_ATTEMPTS)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }
}
