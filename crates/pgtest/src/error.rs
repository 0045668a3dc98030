//! The error surface of [`crate::TestCluster`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::LifecycleState;
use crate::init::InitError;
use crate::locator::LocateError;
use crate::port::{PortConflict, PortError};
use crate::server::ServerError;

/// Errors surfaced by the cluster lifecycle.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No usable PostgreSQL installation was found.
    #[error(transparent)]
    BinaryNotFound(#[from] LocateError),
    /// The cluster directory could not be initialised.
    #[error("cluster initialisation failed: {0}")]
    Init(#[from] InitError),
    /// The port was taken: retries were exhausted, or a pinned port was busy.
    #[error("port conflict on {port} after {attempts} attempt(s)")]
    PortConflict {
        /// Start attempts made.
        attempts: u32,
        /// Port tried last.
        port: u16,
        /// Last lines of the server log, when available.
        log_tail: String,
    },
    /// The server did not become ready in time.
    #[error("server did not accept connections within {timeout:?}\n{log_tail}")]
    StartupTimeout {
        /// Configured startup timeout.
        timeout: Duration,
        /// Last lines of the server log.
        log_tail: String,
    },
    /// The server exited before becoming ready.
    #[error("server failed to start (status: {exit_status:?})\n{log_tail}")]
    StartupFailed {
        /// `pg_ctl` exit code, when it was the process that failed.
        exit_status: Option<i32>,
        /// Last lines of the server log.
        log_tail: String,
    },
    /// A running server could not be stopped.
    #[error("failed to stop the server: {source}")]
    Shutdown {
        /// Underlying controller failure.
        #[source]
        source: ServerError,
    },
    /// Any other failure while driving the server.
    #[error("server control failed: {source}")]
    Server {
        /// Underlying controller failure.
        #[source]
        source: ServerError,
    },
    /// No port could be obtained from the operating system.
    #[error("port allocation failed: {source}")]
    Port {
        /// Underlying allocation failure.
        #[source]
        source: PortError,
    },
    /// The operation needs a cluster in another state.
    #[error("cannot {operation} while the cluster is {state}")]
    State {
        /// Operation attempted.
        operation: &'static str,
        /// State at the time.
        state: LifecycleState,
    },
    /// The configuration was rejected before anything was created.
    #[error("invalid cluster configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
    /// The base directory could not be created.
    #[error("failed to create temporary directory under {parent:?}: {source}")]
    TempDir {
        /// Parent directory.
        parent: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A filesystem operation on the cluster's files failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl ClusterError {
    /// Returns `true` for port conflicts, whether retried or pinned.
    #[must_use]
    pub const fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict { .. })
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl PortConflict for ClusterError {
    fn is_port_conflict(&self) -> bool {
        Self::is_port_conflict(self)
    }
}

impl From<PortError> for ClusterError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::Exhausted {
                attempts,
                last_port,
            } => Self::PortConflict {
                attempts,
                port: last_port,
                log_tail: String::new(),
            },
            PortError::Invalid { port } => {
                Self::invalid_config(format!("port {port} is outside the usable range 1025-65534"))
            }
            source @ (PortError::Bind { .. } | PortError::NoUsablePort { .. }) => {
                Self::Port { source }
            }
        }
    }
}

impl From<ServerError> for ClusterError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::PortConflict { port, log_tail } => Self::PortConflict {
                attempts: 1,
                port,
                log_tail,
            },
            ServerError::StartupTimeout { timeout, log_tail } => {
                Self::StartupTimeout { timeout, log_tail }
            }
            ServerError::StartupFailed {
                exit_status,
                log_tail,
            } => Self::StartupFailed {
                exit_status,
                log_tail,
            },
            source @ ServerError::Shutdown { .. } => Self::Shutdown { source },
            source => Self::Server { source },
        }
    }
}
