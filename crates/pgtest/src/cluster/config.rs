//! Programmatic cluster configuration.
//!
//! [`ClusterConfig`] is a consuming builder. It can be seeded from
//! [`Settings`] and is validated before anything touches the filesystem.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pgtest_config::{
    DEFAULT_MAX_PORT_ATTEMPTS, DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_TIMEOUT,
    DEFAULT_SUPERUSER, Settings,
};

use crate::error::ClusterError;
use crate::init::{InitOptions, is_valid_db_object_name};
use crate::locator::{BinaryPaths, LocatorHints};
use crate::port::{PortPolicy, is_valid_port};
use crate::server::ServerOptions;

/// Everything needed to start a [`crate::TestCluster`].
///
/// Built with chained setters; nothing is validated until the cluster
/// launches.
///
/// ```no_run
/// use std::time::Duration;
/// use pgtest::{ClusterConfig, TestCluster};
///
/// let config = ClusterConfig::new()
///     .superuser("app_owner")
///     .server_setting("fsync", "off")
///     .startup_timeout(Duration::from_secs(30));
/// let cluster = TestCluster::start(config)?;
/// println!("{}", cluster.url()?);
/// # Ok::<(), pgtest::ClusterError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub(super) binaries: Option<BinaryPaths>,
    pub(super) bin_dir: Option<PathBuf>,
    pub(super) pg_ctl: Option<PathBuf>,
    pub(super) port: Option<u16>,
    pub(super) max_port_attempts: u32,
    pub(super) superuser: String,
    pub(super) init: InitOptions,
    pub(super) server: ServerOptions,
    pub(super) startup_timeout: Duration,
    pub(super) shutdown_grace: Duration,
    pub(super) base_dir: Option<PathBuf>,
    pub(super) log_file: Option<PathBuf>,
    pub(super) copy_cluster: Option<PathBuf>,
    pub(super) retain_on_close: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            binaries: None,
            bin_dir: None,
            pg_ctl: None,
            port: None,
            max_port_attempts: DEFAULT_MAX_PORT_ATTEMPTS,
            superuser: DEFAULT_SUPERUSER.to_owned(),
            init: InitOptions::default(),
            server: ServerOptions::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            base_dir: None,
            log_file: None,
            copy_cluster: None,
            retain_on_close: false,
        }
    }
}

impl ClusterConfig {
    /// Defaults: discovered binaries, ephemeral port, `postgres` superuser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a configuration from layered [`Settings`].
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::new()
            .superuser(settings.superuser())
            .max_port_attempts(settings.max_port_attempts())
            .startup_timeout(settings.startup_timeout())
            .shutdown_grace(settings.shutdown_grace());
        if let Some(dir) = settings.bin_dir() {
            config = config.bin_dir(dir.as_std_path());
        }
        if let Some(pg_ctl) = settings.pg_ctl() {
            config = config.pg_ctl(pg_ctl.as_std_path());
        }
        if let Some(port) = settings.port {
            config = config.port(port);
        }
        config
    }

    /// Uses already-resolved binaries and skips discovery.
    #[must_use]
    pub fn binaries(mut self, binaries: BinaryPaths) -> Self {
        self.binaries = Some(binaries);
        self
    }

    /// Looks for the tools in this directory only.
    #[must_use]
    pub fn bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    /// Uses this `pg_ctl`; its directory must hold `initdb` and `postgres`.
    #[must_use]
    pub fn pg_ctl(mut self, pg_ctl: impl Into<PathBuf>) -> Self {
        self.pg_ctl = Some(pg_ctl.into());
        self
    }

    /// Pins the server to `port`. A conflict is then reported immediately.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Bounds the fresh ports tried after conflicts.
    #[must_use]
    pub const fn max_port_attempts(mut self, attempts: u32) -> Self {
        self.max_port_attempts = attempts;
        self
    }

    /// Names the superuser created by `initdb`.
    #[must_use]
    pub fn superuser(mut self, name: impl Into<String>) -> Self {
        self.superuser = name.into();
        self
    }

    /// Appends raw `initdb` arguments.
    #[must_use]
    pub fn init_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.init = self.init.with_args(args);
        self
    }

    /// Sets the cluster encoding (default `UTF8`).
    #[must_use]
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.init = self.init.with_encoding(encoding);
        self
    }

    /// Sets the cluster locale (default `C`).
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.init = self.init.with_locale(locale);
        self
    }

    /// Adds a `-c key=value` server setting.
    #[must_use]
    pub fn server_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.server = self.server.with_setting(key, value);
        self
    }

    /// Appends raw postmaster arguments.
    #[must_use]
    pub fn server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server = self.server.with_args(args);
        self
    }

    /// Sets `max_connections`.
    #[must_use]
    pub const fn max_connections(mut self, max: u32) -> Self {
        self.server.max_connections = Some(max);
        self
    }

    /// Time allowed for the server to accept connections.
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Time allowed for a graceful stop before the postmaster is killed.
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Creates the temporary directory under `parent` instead of the system
    /// temp directory.
    #[must_use]
    pub fn base_dir(mut self, parent: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(parent.into());
        self
    }

    /// Writes the server log to `path`, which survives cleanup.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Copies an existing cluster instead of running `initdb`.
    #[must_use]
    pub fn copy_cluster(mut self, template: impl Into<PathBuf>) -> Self {
        self.copy_cluster = Some(template.into());
        self
    }

    /// Keeps the directory on disk after close, for post-mortem inspection.
    #[must_use]
    pub const fn retain_on_close(mut self, retain: bool) -> Self {
        self.retain_on_close = retain;
        self
    }

    /// Locator hints derived from this configuration and the current `PATH`.
    #[must_use]
    pub fn hints(&self) -> LocatorHints {
        let mut hints = LocatorHints::from_env();
        if let Some(dir) = &self.bin_dir {
            hints = hints.with_bin_dir(dir);
        }
        if let Some(pg_ctl) = &self.pg_ctl {
            hints = hints.with_pg_ctl(pg_ctl);
        }
        hints
    }

    pub(super) fn port_policy(&self) -> PortPolicy {
        self.port.map_or(
            PortPolicy::Ephemeral {
                max_attempts: self.max_port_attempts,
            },
            PortPolicy::Pinned,
        )
    }

    pub(super) fn validate(&self) -> Result<(), ClusterError> {
        if !is_valid_db_object_name(&self.superuser) {
            return Err(ClusterError::invalid_config(format!(
                "superuser {:?} is not a valid role name",
                self.superuser
            )));
        }
        if let Some(port) = self.port
            && !is_valid_port(port)
        {
            return Err(ClusterError::invalid_config(format!(
                "port {port} is outside the usable range 1025-65534"
            )));
        }
        require_dir(self.base_dir.as_deref(), "base directory")?;
        require_dir(self.copy_cluster.as_deref(), "template cluster")?;
        if self.startup_timeout.is_zero() {
            return Err(ClusterError::invalid_config("startup timeout must be positive"));
        }
        Ok(())
    }
}

fn require_dir(path: Option<&Path>, what: &str) -> Result<(), ClusterError> {
    match path {
        Some(dir) if !dir.is_dir() => Err(ClusterError::invalid_config(format!(
            "{what} {dir:?} does not exist"
        ))),
        _ => Ok(()),
    }
}
