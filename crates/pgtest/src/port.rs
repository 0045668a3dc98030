//! Ephemeral TCP port allocation with bounded retry.
//!
//! The operating system hands out a free port by binding `127.0.0.1:0`. The
//! listener is released before the server starts, so another process can grab
//! the port in between; [`allocate_with_retry`] absorbs that race by drawing a
//! fresh port whenever the start attempt reports a conflict.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

use thiserror::Error;
use tracing::{debug, warn};

const PORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::port");

/// Draws allowed before giving up on finding a port in the valid range.
const MAX_DRAWS: usize = 32;

/// Classifies errors that mean "the chosen port was already taken".
pub trait PortConflict {
    /// Returns `true` when the failure was caused by a port collision.
    fn is_port_conflict(&self) -> bool;
}

/// Errors raised while choosing a port.
#[derive(Debug, Error)]
pub enum PortError {
    /// Binding the throwaway listener failed.
    #[error("failed to bind an ephemeral port on 127.0.0.1: {source}")]
    Bind {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The operating system kept returning reserved ports.
    #[error("no usable port after {draws} draws")]
    NoUsablePort {
        /// Number of ports drawn.
        draws: usize,
    },
    /// Every attempt hit a port conflict.
    #[error("port conflict persisted after {attempts} attempts (last port {last_port})")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Port tried last.
        last_port: u16,
    },
    /// A pinned port is outside the usable range.
    #[error("port {port} is outside the usable range 1025-65534")]
    Invalid {
        /// Rejected port.
        port: u16,
    },
}

/// How [`run`] chooses ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPolicy {
    /// Fresh OS-assigned ports, retried on conflict.
    Ephemeral {
        /// Upper bound on start attempts.
        max_attempts: u32,
    },
    /// A caller-chosen port, tried exactly once.
    Pinned(u16),
}

/// Returns `true` for ports a throwaway server may bind.
#[must_use]
pub const fn is_valid_port(port: u16) -> bool {
    port > 1024 && port < 65535
}

/// Obtains a currently unused port on the loopback interface.
///
/// # Errors
///
/// [`PortError::Bind`] when no listener can be opened, and
/// [`PortError::NoUsablePort`] when every draw lands outside the valid range.
pub fn allocate() -> Result<u16, PortError> {
    for _ in 0..MAX_DRAWS {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|source| PortError::Bind { source })?;
        let port = listener
            .local_addr()
            .map_err(|source| PortError::Bind { source })?
            .port();
        drop(listener);
        if is_valid_port(port) {
            debug!(target: PORT_TARGET, port, "allocated ephemeral port");
            return Ok(port);
        }
    }
    Err(PortError::NoUsablePort { draws: MAX_DRAWS })
}

/// Calls `start` with fresh ports until it succeeds or stops conflicting.
///
/// Errors that are not port conflicts are returned unchanged after the first
/// attempt. Hitting `max_attempts` conflicts yields [`PortError::Exhausted`]
/// converted into the caller's error type. A `max_attempts` of zero is
/// treated as one.
///
/// # Errors
///
/// The first non-conflict error from `start`, an allocation failure, or
/// [`PortError::Exhausted`].
pub fn allocate_with_retry<T, E, F>(max_attempts: u32, mut start: F) -> Result<T, E>
where
    E: PortConflict + From<PortError>,
    F: FnMut(u16) -> Result<T, E>,
{
    let attempts = max_attempts.max(1);
    let mut last_port = 0;
    for attempt in 1..=attempts {
        let port = allocate()?;
        last_port = port;
        match start(port) {
            Err(error) if error.is_port_conflict() => {
                warn!(
                    target: PORT_TARGET,
                    port,
                    attempt,
                    max_attempts = attempts,
                    "port conflict; retrying with a fresh port"
                );
            }
            other => return other,
        }
    }
    Err(PortError::Exhausted {
        attempts,
        last_port,
    }
    .into())
}

/// Runs `start` under `policy`.
///
/// Pinned ports are validated and tried once; a conflict is returned as-is.
///
/// # Errors
///
/// [`PortError::Invalid`] for an out-of-range pinned port, otherwise whatever
/// `start` or [`allocate_with_retry`] returns.
pub fn run<T, E, F>(policy: PortPolicy, mut start: F) -> Result<T, E>
where
    E: PortConflict + From<PortError>,
    F: FnMut(u16) -> Result<T, E>,
{
    match policy {
        PortPolicy::Ephemeral { max_attempts } => allocate_with_retry(max_attempts, start),
        PortPolicy::Pinned(port) if !is_valid_port(port) => {
            Err(PortError::Invalid { port }.into())
        }
        PortPolicy::Pinned(port) => start(port),
    }
}
