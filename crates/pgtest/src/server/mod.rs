//! Starting and stopping a PostgreSQL server over an initialised cluster.
//!
//! The controller drives `pg_ctl`. Startup launches the postmaster detached,
//! then polls the server log and the TCP port until the server accepts
//! connections, reports a port conflict, dies, or the timeout elapses. Every
//! unsuccessful start kills any postmaster it spawned before returning.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;

use tracing::{debug, info, warn};

mod error;
pub(crate) mod monitoring;
pub(crate) mod process;
mod shutdown;
mod socket;
mod spawning;


pub use error::ServerError;
pub use monitoring::{CONFLICT_SIGNATURES, POLL_INTERVAL, READY_MARKER};
pub use shutdown::FORCE_KILL_WAIT;

use monitoring::{LogCursor, ReadinessCheck, StartupOutcome, wait_for_ready};

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Postmaster options beyond the fixed ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions {
    pub(crate) max_connections: Option<u32>,
    settings: Vec<(String, String)>,
    extra_args: Vec<String>,
}

impl ServerOptions {
    /// Sets `max_connections` (`-N`).
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Adds a `-c key=value` setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push((key.into(), value.into()));
        self
    }

    /// Appends raw postmaster arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Where and how one server instance should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    data_dir: PathBuf,
    port: u16,
    log_file: PathBuf,
    socket_dir: Option<PathBuf>,
}

impl StartRequest {
    /// Describes a server for `data_dir` listening on `port`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, port: u16, log_file: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            port,
            log_file: log_file.into(),
            socket_dir: None,
        }
    }

    /// Places the Unix socket in `dir`.
    #[must_use]
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Copy of this request on another port.
    #[must_use]
    pub fn on_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

/// A server started by [`ServerController::start`].
#[derive(Debug)]
pub struct ServerHandle {
    data_dir: PathBuf,
    port: u16,
    log_file: PathBuf,
    socket_dir: Option<PathBuf>,
    pg_ctl: PathBuf,
    pid: Option<i32>,
    stopped: bool,
}

impl ServerHandle {
    fn new(pg_ctl: &Path, request: &StartRequest, pid: Option<i32>) -> Self {
        Self {
            data_dir: request.data_dir.clone(),
            port: request.port,
            log_file: request.log_file.clone(),
            socket_dir: request.socket_dir.clone(),
            pg_ctl: pg_ctl.to_path_buf(),
            pid,
            stopped: false,
        }
    }

    /// Port the server listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Cluster data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Server log file.
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Unix socket directory, when one was configured.
    #[must_use]
    pub fn socket_dir(&self) -> Option<&Path> {
        self.socket_dir.as_deref()
    }

    /// Postmaster pid, read from `postmaster.pid` when it was not known at
    /// startup.
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        self.pid.or_else(|| process::read_postmaster_pid(&self.data_dir))
    }

    /// Returns `true` once [`ServerController::stop`] has succeeded.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Returns `true` while the postmaster process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped && self.pid().is_some_and(process::is_alive)
    }
}

/// Drives `pg_ctl` for one PostgreSQL installation.
#[derive(Debug, Clone)]
pub struct ServerController {
    pg_ctl: PathBuf,
    postgres: PathBuf,
    options: ServerOptions,
}

impl ServerController {
    /// Builds a controller from the `pg_ctl` and `postgres` binaries.
    #[must_use]
    pub fn new(
        pg_ctl: impl Into<PathBuf>,
        postgres: impl Into<PathBuf>,
        options: ServerOptions,
    ) -> Self {
        Self {
            pg_ctl: pg_ctl.into(),
            postgres: postgres.into(),
            options,
        }
    }

    /// Starts a server and waits until it accepts connections.
    ///
    /// # Errors
    ///
    /// [`ServerError::PortConflict`] when the port is taken,
    /// [`ServerError::StartupFailed`] when `pg_ctl` or the postmaster exits
    /// early, and [`ServerError::StartupTimeout`] when `timeout` elapses. In
    /// every case any postmaster that was spawned has been killed. A
    /// `postmaster.pid` already in the data directory is deleted first and
    /// [`ServerError::StalePidFile`] is returned when that fails.
    pub fn start(
        &self,
        request: &StartRequest,
        timeout: Duration,
    ) -> Result<ServerHandle, ServerError> {
        let log = LogCursor::at_end(&request.log_file)?;
        process::discard_pid_file(&request.data_dir)?;
        let mut child =
            spawning::spawn_start(&self.pg_ctl, &self.postgres, request, &self.options)?;
        let readiness = ReadinessCheck {
            data_dir: &request.data_dir,
            port: request.port,
            log: &log,
            timeout,
        };
        let outcome = match wait_for_ready(&mut child, &readiness) {
            Ok(outcome) => outcome,
            Err(error) => {
                abandon_child(&mut child);
                let mut handle = ServerHandle::new(&self.pg_ctl, request, None);
                shutdown::abort_startup(&mut handle);
                return Err(error);
            }
        };
        if matches!(outcome, StartupOutcome::Ready { .. }) {
            // `pg_ctl start -W` exits as soon as the postmaster is forked.
            if let Err(error) = child.wait() {
                debug!(target: SERVER_TARGET, %error, "failed to collect pg_ctl");
            }
        } else {
            abandon_child(&mut child);
        }

        let mut handle = ServerHandle::new(&self.pg_ctl, request, outcome.pid());
        let error = match outcome {
            StartupOutcome::Ready { pid } => {
                info!(
                    target: SERVER_TARGET,
                    port = request.port,
                    pid,
                    data_dir = %request.data_dir.display(),
                    "server accepting connections"
                );
                return Ok(handle);
            }
            StartupOutcome::PortConflict { .. } => ServerError::PortConflict {
                port: request.port,
                log_tail: log.tail(),
            },
            StartupOutcome::Failed { exit_status, .. } => ServerError::StartupFailed {
                exit_status,
                log_tail: log.tail(),
            },
            StartupOutcome::TimedOut { .. } => ServerError::StartupTimeout {
                timeout,
                log_tail: log.tail(),
            },
        };
        warn!(
            target: SERVER_TARGET,
            port = request.port,
            %error,
            "server failed to start"
        );
        shutdown::abort_startup(&mut handle);
        Err(error)
    }

    /// Stops the server, escalating to SIGKILL after `grace`.
    ///
    /// Stopping an already stopped handle succeeds without doing anything.
    ///
    /// # Errors
    ///
    /// [`ServerError::Shutdown`] when the postmaster survives the forced stop.
    pub fn stop(&self, handle: &mut ServerHandle, grace: Duration) -> Result<(), ServerError> {
        shutdown::stop(handle, grace)
    }
}

/// Collects `pg_ctl`, killing it if it is still running.
fn abandon_child(child: &mut Child) {
    if let Ok(None) = child.try_wait()
        && let Err(error) = child.kill()
    {
        debug!(target: SERVER_TARGET, %error, "failed to kill pg_ctl");
    }
    if let Err(error) = child.wait() {
        debug!(target: SERVER_TARGET, %error, "failed to collect pg_ctl");
    }
}
