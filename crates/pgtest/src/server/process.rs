//! Postmaster pid discovery and signalling.

use std::fs;
use std::io;
use std::path::Path;

use super::error::ServerError;

/// Name of the pid file the postmaster writes into its data directory.
pub(crate) const PID_FILE: &str = "postmaster.pid";

/// Reads the postmaster pid from the first line of `postmaster.pid`.
///
/// Missing, empty, partially written or non-positive values read as `None`.
pub(crate) fn read_postmaster_pid(data_dir: &Path) -> Option<i32> {
    let content = fs::read_to_string(data_dir.join(PID_FILE)).ok()?;
    parse_pid(&content)
}

/// Deletes a `postmaster.pid` left in `data_dir` before a server is launched.
///
/// Startup trusts the first pid it reads from this file, so a leftover would
/// point it at a process this controller never spawned.
pub(crate) fn discard_pid_file(data_dir: &Path) -> Result<(), ServerError> {
    let path = data_dir.join(PID_FILE);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ServerError::StalePidFile { path, source }),
    }
}

fn parse_pid(content: &str) -> Option<i32> {
    content
        .lines()
        .next()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

/// Returns `true` while `pid` names a live, non-zombie process.
#[cfg(unix)]
pub(crate) fn is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    // The state field follows the parenthesised command name.
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(all(unix, not(target_os = "linux")))]
const fn is_zombie(_pid: i32) -> bool {
    false
}

#[cfg(not(unix))]
pub(crate) fn is_alive(pid: i32) -> bool {
    use std::process::Command;

    if pid <= 0 {
        return false;
    }
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .is_ok_and(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
}

/// Sends SIGKILL to `pid`. A process that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn force_kill(pid: i32) -> Result<(), ServerError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if pid <= 0 {
        return Ok(());
    }
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ServerError::Signal {
            pid,
            source: io::Error::from(errno),
        }),
    }
}

#[cfg(not(unix))]
pub(crate) fn force_kill(pid: i32) -> Result<(), ServerError> {
    use std::process::{Command, Stdio};

    if pid <= 0 {
        return Ok(());
    }
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ServerError::Signal { pid, source })?;
    if status.success() || !is_alive(pid) {
        Ok(())
    } else {
        Err(ServerError::Signal {
            pid,
            source: io::Error::other(format!("taskkill exited with {status}")),
        })
    }
}
