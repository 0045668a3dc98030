//! Error surface for starting and stopping the server.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::port::PortConflict;

/// Errors raised by the server controller.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `pg_ctl` could not be spawned.
    #[error("failed to run pg_ctl {binary:?}: {source}")]
    Launch {
        /// Binary invoked.
        binary: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened or read.
    #[error("failed to access server log {path:?}: {source}")]
    Log {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A pid file left in the data directory could not be removed.
    #[error("failed to remove stale pid file {path:?}: {source}")]
    StalePidFile {
        /// Pid file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Polling the `pg_ctl` child failed.
    #[error("failed to monitor pg_ctl: {source}")]
    MonitorChild {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Checking the server socket failed for a reason other than refusal.
    #[error("failed to check {endpoint}: {source}")]
    SocketCheck {
        /// Endpoint checked.
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The server exited before becoming ready.
    #[error("server exited before accepting connections (status: {exit_status:?})\n{log_tail}")]
    StartupFailed {
        /// `pg_ctl` exit code, when it was the process that failed.
        exit_status: Option<i32>,
        /// Last lines of the server log.
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
    /// The server could not bind its port.
    #[error("port {port} is already in use\n{log_tail}")]
    PortConflict {
        /// Port that could not be bound.
        port: u16,
        /// Last lines of the server log.
        log_tail: String,
    },
    /// Sending a signal to the postmaster failed.
    #[error("failed to signal postmaster pid {pid}: {source}")]
    Signal {
        /// Target process.
        pid: i32,
        /// Underlying OS failure.
        #[source]
        source: io::Error,
    },
    /// The server survived both the graceful and the forced stop.
    #[error("server on port {port} (pid {pid:?}) still running after forced shutdown")]
    Shutdown {
        /// Port the server was bound to.
        port: u16,
        /// Postmaster pid, if known.
        pid: Option<i32>,
    },
}

impl PortConflict for ServerError {
    fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict { .. })
    }
}
