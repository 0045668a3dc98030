//! The cluster lifecycle facade.
//!
//! [`TestCluster`] owns one uniquely named temporary directory and at most one
//! running server. Launch runs discovery, initialisation, port selection and
//! startup in order; any failure tears down whatever exists before the error
//! is returned, so a failed launch never leaks a process or a directory.
//!
//! ```text
//! <base>/            pgtest-XXXXXX, removed on close
//! <base>/data        cluster data directory (0700)
//! <base>/sock        Unix socket directory
//! <base>/pgtest.log  server log, unless a log file was configured
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

mod config;
pub(crate) mod reaper;
mod state;


pub use config::ClusterConfig;
pub use state::LifecycleState;

use crate::connection::ConnectionDescriptor;
use crate::error::ClusterError;
use crate::init::{ClusterInitializer, copy_template, create_private_dir};
use crate::locator::{BinaryPaths, Platform, locate};
use crate::port;
use crate::server::{ServerController, ServerHandle, StartRequest};

pub(crate) const CLUSTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cluster");

const BASE_PREFIX: &str = "pgtest-";
const DATA_DIR: &str = "data";
const SOCKET_DIR: &str = "sock";
const LOG_FILE: &str = "pgtest.log";

/// Directories and files owned by one cluster.
#[derive(Debug)]
struct Layout {
    base: TempDir,
    data_dir: PathBuf,
    socket_dir: Option<PathBuf>,
    log_file: PathBuf,
}

/// A disposable PostgreSQL server for one test or suite.
///
/// Closing stops the server and deletes the directory; it happens on
/// [`TestCluster::close`], on drop, inside [`TestCluster::scoped`] on every
/// exit path, and as a best-effort fallback when the process exits.
#[derive(Debug)]
pub struct TestCluster {
    id: u64,
    config: ClusterConfig,
    state: LifecycleState,
    binaries: Option<BinaryPaths>,
    layout: Option<Layout>,
    base_path: Option<PathBuf>,
    controller: Option<ServerController>,
    server: Option<ServerHandle>,
}

impl TestCluster {
    /// Creates a cluster in the [`LifecycleState::Created`] state without
    /// touching the filesystem.
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            id: reaper::next_id(),
            config,
            state: LifecycleState::Created,
            binaries: None,
            layout: None,
            base_path: None,
            controller: None,
            server: None,
        }
    }

    /// Creates and launches a cluster, returning it once the server accepts
    /// connections.
    ///
    /// # Errors
    ///
    /// Any launch failure; see [`TestCluster::launch`]. Nothing is left
    /// behind when an error is returned.
    pub fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        let mut cluster = Self::new(config);
        cluster.launch()?;
        Ok(cluster)
    }

    /// Runs `body` against a fresh cluster and closes it afterwards.
    ///
    /// The cluster is closed on every exit path. A panic inside `body` is
    /// resumed after cleanup.
    ///
    /// # Errors
    ///
    /// Launch failures, or a failure to stop the server after `body`.
    pub fn scoped<T, F>(config: ClusterConfig, body: F) -> Result<T, ClusterError>
    where
        F: FnOnce(&Self) -> T,
    {
        let mut cluster = Self::start(config)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&cluster)));
        let closed = cluster.close();
        match outcome {
            Ok(value) => closed.map(|()| value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Launches a cluster created with [`TestCluster::new`].
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is freshly created; otherwise
    /// configuration, discovery, initialisation, port and startup failures.
    /// On failure the cluster is cleaned up and left [`LifecycleState::Failed`].
    pub fn launch(&mut self) -> Result<(), ClusterError> {
        if self.state != LifecycleState::Created {
            return Err(self.state_error("launch"));
        }
        match self.boot() {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(target: CLUSTER_TARGET, id = self.id, %error, "cluster launch failed");
                if let Err(cleanup) = self.teardown(false) {
                    warn!(
                        target: CLUSTER_TARGET,
                        id = self.id,
                        error = %cleanup,
                        "cleanup after failed launch"
                    );
                }
                self.transition(LifecycleState::Failed);
                Err(error)
            }
        }
    }

    fn boot(&mut self) -> Result<(), ClusterError> {
        self.config.validate()?;
        let binaries = match &self.config.binaries {
            Some(known) => known.clone(),
            None => locate(Platform::current(), &self.config.hints())?,
        };
        let layout = self.create_layout()?;
        self.base_path = Some(layout.base.path().to_path_buf());
        let data_dir = layout.data_dir.clone();
        let log_file = layout.log_file.clone();
        let socket_dir = layout.socket_dir.clone();
        self.layout = Some(layout);
        self.binaries = Some(binaries.clone());

        match &self.config.copy_cluster {
            Some(template) => copy_template(template, &data_dir)?,
            None => ClusterInitializer::new(binaries.initdb(), self.config.init.clone())
                .initialize(&data_dir, &self.config.superuser, &log_file)?,
        }
        self.transition(LifecycleState::Initialized);

        let controller = ServerController::new(
            binaries.pg_ctl(),
            binaries.postgres(),
            self.config.server.clone(),
        );
        let mut request = StartRequest::new(&data_dir, 0, &log_file);
        if let Some(dir) = &socket_dir {
            request = request.with_socket_dir(dir);
        }
        let timeout = self.config.startup_timeout;
        self.transition(LifecycleState::Starting);
        let handle = port::run(self.config.port_policy(), |port| {
            debug!(target: CLUSTER_TARGET, id = self.id, port, "starting server");
            controller
                .start(&request.on_port(port), timeout)
                .map_err(ClusterError::from)
        })?;

        reaper::register(
            self.id,
            reaper::ReapTarget {
                data_dir: data_dir.clone(),
                pid: handle.pid(),
                remove: (!self.config.retain_on_close)
                    .then(|| self.base_path.clone())
                    .flatten(),
            },
        );
        info!(
            target: CLUSTER_TARGET,
            id = self.id,
            port = handle.port(),
            data_dir = %data_dir.display(),
            "cluster running"
        );
        self.controller = Some(controller);
        self.server = Some(handle);
        self.transition(LifecycleState::Running);
        Ok(())
    }

    fn create_layout(&self) -> Result<Layout, ClusterError> {
        let parent = self.config.base_dir.clone().unwrap_or_else(env::temp_dir);
        let base = tempfile::Builder::new()
            .prefix(BASE_PREFIX)
            .tempdir_in(&parent)
            .map_err(|source| ClusterError::TempDir { parent, source })?;
        let data_dir = base.path().join(DATA_DIR);
        let socket_dir = cfg!(unix).then(|| base.path().join(SOCKET_DIR));
        if let Some(dir) = &socket_dir {
            create_private_dir(dir).map_err(|source| ClusterError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        let log_file = self
            .config
            .log_file
            .clone()
            .unwrap_or_else(|| base.path().join(LOG_FILE));
        Ok(Layout {
            base,
            data_dir,
            socket_dir,
            log_file,
        })
    }

    /// Stops the server and removes the directory.
    ///
    /// Idempotent, and safe on a cluster that never launched or failed to.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Shutdown`] when a running server could not be killed;
    /// [`ClusterError::Io`] when the directory could not be removed.
    pub fn close(&mut self) -> Result<(), ClusterError> {
        if self.state == LifecycleState::Stopped {
            return Ok(());
        }
        if self.state == LifecycleState::Running {
            self.transition(LifecycleState::Stopping);
        }
        let retain = self.config.retain_on_close;
        match self.teardown(retain) {
            Ok(()) => {
                if self.state != LifecycleState::Failed {
                    self.transition(LifecycleState::Stopped);
                }
                Ok(())
            }
            Err(error) => {
                self.transition(LifecycleState::Failed);
                Err(error)
            }
        }
    }

    /// Stops the server if one is up, then reclaims the directory.
    ///
    /// Safe to repeat: each step is skipped once it has succeeded.
    fn teardown(&mut self, retain: bool) -> Result<(), ClusterError> {
        if let (Some(controller), Some(server)) = (&self.controller, &mut self.server) {
            controller
                .stop(server, self.config.shutdown_grace)
                .map_err(|source| ClusterError::Shutdown { source })?;
        }
        self.server = None;
        reaper::unregister(self.id);

        let Some(layout) = self.layout.take() else {
            return Ok(());
        };
        if retain {
            let kept = layout.base.keep();
            info!(
                target: CLUSTER_TARGET,
                id = self.id,
                path = %kept.display(),
                "cluster directory retained"
            );
            return Ok(());
        }
        let path = layout.base.path().to_path_buf();
        layout.base.close().map_err(|source| ClusterError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(
            target: CLUSTER_TARGET,
            id = self.id,
            path = %path.display(),
            "cluster directory removed"
        );
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns `true` while the server is up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
            && self.server.as_ref().is_some_and(ServerHandle::is_running)
    }

    /// Port the server listens on.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn port(&self) -> Result<u16, ClusterError> {
        self.running_server("read the port").map(ServerHandle::port)
    }

    /// Cluster data directory.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn cluster_dir(&self) -> Result<&Path, ClusterError> {
        self.running_server("read the cluster directory")
            .map(ServerHandle::data_dir)
    }

    /// Temporary directory holding everything the cluster owns.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn base_dir(&self) -> Result<&Path, ClusterError> {
        self.ensure_running("read the base directory")?;
        self.layout
            .as_ref()
            .map(|layout| layout.base.path())
            .ok_or_else(|| self.state_error("read the base directory"))
    }

    /// Superuser created by `initdb`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn superuser(&self) -> Result<&str, ClusterError> {
        self.ensure_running("read the superuser")?;
        Ok(&self.config.superuser)
    }

    /// Server log file.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn log_file(&self) -> Result<&Path, ClusterError> {
        self.running_server("read the log file")
            .map(ServerHandle::log_file)
    }

    /// Binaries the cluster was started with.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn binaries(&self) -> Result<&BinaryPaths, ClusterError> {
        self.ensure_running("read the binaries")?;
        self.binaries
            .as_ref()
            .ok_or_else(|| self.state_error("read the binaries"))
    }

    /// Connection descriptor for clients.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn connection(&self) -> Result<ConnectionDescriptor, ClusterError> {
        let port = self.port()?;
        Ok(ConnectionDescriptor::new(&self.config.superuser, port))
    }

    /// `postgresql://<user>@localhost:<port>/postgres`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn url(&self) -> Result<String, ClusterError> {
        self.connection().map(|descriptor| descriptor.url())
    }

    /// Connection parameters keyed by `user`, `host`, `port` and `database`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running.
    pub fn params(&self) -> Result<BTreeMap<&'static str, String>, ClusterError> {
        self.connection().map(|descriptor| descriptor.params())
    }

    /// Full contents of the server log.
    ///
    /// # Errors
    ///
    /// [`ClusterError::State`] unless the cluster is running, and
    /// [`ClusterError::Io`] when the log cannot be read.
    pub fn log_contents(&self) -> Result<String, ClusterError> {
        let path = self.log_file()?;
        fs::read_to_string(path).map_err(|source| ClusterError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn running_server(&self, operation: &'static str) -> Result<&ServerHandle, ClusterError> {
        self.ensure_running(operation)?;
        self.server
            .as_ref()
            .ok_or_else(|| self.state_error(operation))
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), ClusterError> {
        if self.state == LifecycleState::Running {
            Ok(())
        } else {
            Err(self.state_error(operation))
        }
    }

    const fn state_error(&self, operation: &'static str) -> ClusterError {
        ClusterError::State {
            operation,
            state: self.state,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(
            target: CLUSTER_TARGET,
            id = self.id,
            from = %self.state,
            to = %next,
            "lifecycle transition"
        );
        self.state = next;
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        if let Err(error) = self.close() {
            warn!(target: CLUSTER_TARGET, id = self.id, %error, "failed to close cluster on drop");
        }
    }
}
