//! Readiness detection for a freshly launched server.
//!
//! `pg_ctl start -W` returns as soon as the postmaster is forked, so readiness
//! is inferred from the server log and a TCP connect. The log is re-read from
//! the offset recorded before launch on every poll; earlier attempts against
//! the same data directory therefore never leak into the verdict.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use super::error::ServerError;
use super::process::{is_alive, read_postmaster_pid};
use super::socket::port_is_reachable;

/// Interval between readiness checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Log line the postmaster emits once it accepts connections.
pub const READY_MARKER: &str = "database system is ready to accept connections";

/// Log fragments that mean the port could not be bound.
pub const CONFLICT_SIGNATURES: [&str; 2] = [
    "Address already in use",
    "could not create any TCP/IP sockets",
];

const LOG_TAIL_LINES: usize = 20;

/// View of the server log from a fixed starting offset.
#[derive(Debug, Clone)]
pub(crate) struct LogCursor {
    path: PathBuf,
    offset: usize,
}

impl LogCursor {
    /// Starts the cursor at the current end of `path`.
    pub(crate) fn at_end(path: &Path) -> Result<Self, ServerError> {
        let offset = match fs::metadata(path) {
            Ok(metadata) => usize::try_from(metadata.len()).unwrap_or(usize::MAX),
            Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(ServerError::Log {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            offset,
        })
    }

    /// Reads everything written since the cursor was created.
    ///
    /// A missing file reads as empty; invalid UTF-8 from a partial write is
    /// replaced rather than rejected.
    pub(crate) fn read(&self) -> Result<String, ServerError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes
                .get(self.offset..)
                .map(|fresh| String::from_utf8_lossy(fresh).into_owned())
                .unwrap_or_default()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ServerError::Log {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Last lines written since the cursor was created.
    pub(crate) fn tail(&self) -> String {
        self.read()
            .map(|content| log_tail(&content))
            .unwrap_or_default()
    }
}

/// Verdict of [`wait_for_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartupOutcome {
    /// The server accepts connections.
    Ready {
        /// Postmaster pid from `postmaster.pid`, if it was readable.
        pid: Option<i32>,
    },
    /// The log reports that the port could not be bound.
    PortConflict {
        /// Postmaster pid observed during startup.
        pid: Option<i32>,
    },
    /// `pg_ctl` failed or the postmaster died before becoming ready.
    Failed {
        /// `pg_ctl` exit code when it was the process that failed.
        exit_status: Option<i32>,
        /// Postmaster pid observed during startup.
        pid: Option<i32>,
    },
    /// The deadline passed first.
    TimedOut {
        /// Postmaster pid observed during startup.
        pid: Option<i32>,
    },
}

impl StartupOutcome {
    /// Postmaster pid carried by the outcome.
    pub(crate) const fn pid(self) -> Option<i32> {
        match self {
            Self::Ready { pid }
            | Self::PortConflict { pid }
            | Self::Failed { pid, .. }
            | Self::TimedOut { pid } => pid,
        }
    }
}

/// Inputs to [`wait_for_ready`].
#[derive(Debug)]
pub(crate) struct ReadinessCheck<'a> {
    pub data_dir: &'a Path,
    pub port: u16,
    pub log: &'a LogCursor,
    pub timeout: Duration,
}

/// Polls until the server is ready, fails, conflicts or times out.
///
/// A clean `pg_ctl` exit means the postmaster was detached; only a non-zero
/// exit is treated as failure. Once detached, a postmaster that was seen and
/// then disappears is reported as a failure without waiting for the deadline.
pub(crate) fn wait_for_ready(
    child: &mut Child,
    check: &ReadinessCheck<'_>,
) -> Result<StartupOutcome, ServerError> {
    let deadline = Instant::now() + check.timeout;
    let mut detached = false;
    let mut exit_failure = None;
    let mut seen_pid = None;
    loop {
        if !detached
            && exit_failure.is_none()
            && let Some(status) = child
                .try_wait()
                .map_err(|source| ServerError::MonitorChild { source })?
        {
            if status.success() {
                detached = true;
            } else {
                exit_failure = Some(status.code());
            }
        }

        if let Some(pid) = read_postmaster_pid(check.data_dir) {
            seen_pid = Some(pid);
        }
        // Decided before reading the log so a dying postmaster's last words
        // are always seen.
        let postmaster_gone = detached && seen_pid.is_some_and(|pid| !is_alive(pid));
        let log = check.log.read()?;
        if has_port_conflict(&log) {
            return Ok(StartupOutcome::PortConflict { pid: seen_pid });
        }
        if let Some(exit_status) = exit_failure {
            return Ok(StartupOutcome::Failed {
                exit_status,
                pid: seen_pid,
            });
        }
        if log.contains(READY_MARKER) && port_is_reachable(check.port)? {
            return Ok(StartupOutcome::Ready { pid: seen_pid });
        }
        if postmaster_gone {
            return Ok(StartupOutcome::Failed {
                exit_status: None,
                pid: seen_pid,
            });
        }
        if Instant::now() >= deadline {
            return Ok(StartupOutcome::TimedOut { pid: seen_pid });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Returns `true` when the log reports a failed bind.
pub(crate) fn has_port_conflict(log: &str) -> bool {
    CONFLICT_SIGNATURES
        .iter()
        .any(|signature| log.contains(signature))
}

/// Returns the last few lines of `log`.
pub(crate) fn log_tail(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines.get(start..).unwrap_or_default().join("\n")
}
