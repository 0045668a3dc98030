//! Server shutdown: graceful first, forced if needed.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::error::ServerError;
use super::monitoring::POLL_INTERVAL;
use super::process::{force_kill, is_alive, read_postmaster_pid};
use super::socket::{port_is_reachable, unix_socket_is_reachable};
use super::spawning::stop_command;
use super::{SERVER_TARGET, ServerHandle};

/// How long a SIGKILLed postmaster gets to disappear.
pub const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

/// Stops the server behind `handle`; a no-op once it has stopped.
pub(super) fn stop(handle: &mut ServerHandle, grace: Duration) -> Result<(), ServerError> {
    if handle.stopped {
        return Ok(());
    }
    let pid = handle
        .pid
        .or_else(|| read_postmaster_pid(&handle.data_dir));

    if request_fast_shutdown(handle, grace) && wait_until_down(handle, pid, grace)? {
        info!(
            target: SERVER_TARGET,
            port = handle.port,
            pid,
            "server stopped"
        );
        handle.stopped = true;
        return Ok(());
    }

    warn!(
        target: SERVER_TARGET,
        port = handle.port,
        pid,
        "graceful shutdown did not complete; killing postmaster"
    );
    if let Some(known) = pid {
        force_kill(known)?;
    }
    if wait_until_down(handle, pid, FORCE_KILL_WAIT)? {
        handle.stopped = true;
        return Ok(());
    }
    Err(ServerError::Shutdown {
        port: handle.port,
        pid,
    })
}

/// Kills whatever postmaster a failed startup left behind.
pub(super) fn abort_startup(handle: &mut ServerHandle) {
    let Some(pid) = handle
        .pid
        .or_else(|| read_postmaster_pid(&handle.data_dir))
    else {
        handle.stopped = true;
        return;
    };
    if let Err(error) = force_kill(pid) {
        warn!(
            target: SERVER_TARGET,
            pid,
            %error,
            "failed to kill postmaster after failed startup"
        );
        return;
    }
    let deadline = Instant::now() + FORCE_KILL_WAIT;
    while is_alive(pid) && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    handle.stopped = !is_alive(pid);
    debug!(
        target: SERVER_TARGET,
        pid,
        stopped = handle.stopped,
        "aborted startup"
    );
}

fn request_fast_shutdown(handle: &ServerHandle, grace: Duration) -> bool {
    let mut command = stop_command(&handle.pg_ctl, &handle.data_dir, &handle.log_file, grace);
    match command.status() {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!(target: SERVER_TARGET, port = handle.port, %status, "pg_ctl stop failed");
            false
        }
        Err(error) => {
            debug!(
                target: SERVER_TARGET,
                port = handle.port,
                %error,
                "pg_ctl stop could not run"
            );
            false
        }
    }
}

/// Polls until the postmaster is gone and its sockets stop answering.
fn wait_until_down(
    handle: &ServerHandle,
    pid: Option<i32>,
    within: Duration,
) -> Result<bool, ServerError> {
    let deadline = Instant::now() + within;
    loop {
        if is_down(handle, pid)? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// A known postmaster pid decides on its own: once it is dead the server is
/// down, whoever now answers on the port. Sockets are consulted only when no
/// pid was ever recorded.
fn is_down(handle: &ServerHandle, pid: Option<i32>) -> Result<bool, ServerError> {
    if let Some(known) = pid {
        return Ok(!is_alive(known));
    }
    if port_is_reachable(handle.port)? {
        return Ok(false);
    }
    match &handle.socket_dir {
        Some(dir) => Ok(!unix_socket_is_reachable(dir, handle.port)?),
        None => Ok(true),
    }
}
