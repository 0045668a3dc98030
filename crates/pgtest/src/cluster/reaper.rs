//! Last-resort cleanup when the process exits with clusters still open.
//!
//! Live clusters register here while running. An `atexit` hook, installed on
//! first registration, kills every registered postmaster and removes its
//! directory. The hook runs on a normal `exit`, including the one libtest
//! performs after the last test; it does not run on `abort` or when the
//! process is killed by a signal. Nothing here is timing-guaranteed.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::{Lazy, OnceCell};
use tracing::debug;

use super::CLUSTER_TARGET;
use crate::server::process::{force_kill, read_postmaster_pid};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: Lazy<Mutex<HashMap<u64, ReapTarget>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static HOOK: OnceCell<bool> = OnceCell::new();

/// What to clean up for one live cluster.
#[derive(Debug, Clone)]
pub(crate) struct ReapTarget {
    pub data_dir: PathBuf,
    pub pid: Option<i32>,
    /// Directory to delete, or `None` when it must be retained.
    pub remove: Option<PathBuf>,
}

/// Allocates an identifier for a new cluster.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Records a running cluster.
pub(crate) fn register(id: u64, target: ReapTarget) {
    install_hook();
    if let Ok(mut registry) = REGISTRY.lock() {
        registry.insert(id, target);
    }
}

/// Forgets a cluster that has been closed.
pub(crate) fn unregister(id: u64) {
    if let Ok(mut registry) = REGISTRY.lock() {
        registry.remove(&id);
    }
}

#[cfg(test)]
pub(crate) fn is_registered(id: u64) -> bool {
    REGISTRY
        .lock()
        .map(|registry| registry.contains_key(&id))
        .unwrap_or(false)
}

/// Kills and removes everything still registered.
pub(crate) fn reap_all() {
    // `try_lock`: a thread may have held the lock when `exit` was called.
    let Ok(mut registry) = REGISTRY.try_lock() else {
        return;
    };
    for (id, target) in registry.drain() {
        reap(&target);
        debug!(target: CLUSTER_TARGET, id, "reaped cluster at exit");
    }
}

fn reap(target: &ReapTarget) {
    if let Some(pid) = target.pid.or_else(|| read_postmaster_pid(&target.data_dir))
        && let Err(error) = force_kill(pid)
    {
        debug!(target: CLUSTER_TARGET, pid, %error, "reaper could not kill postmaster");
    }
    if let Some(dir) = &target.remove
        && let Err(error) = fs::remove_dir_all(dir)
    {
        debug!(
            target: CLUSTER_TARGET,
            dir = %dir.display(),
            %error,
            "reaper could not remove directory"
        );
    }
}

#[cfg(unix)]
fn install_hook() {
    extern "C" fn reap_at_exit() {
        reap_all();
    }

    HOOK.get_or_init(|| {
        // SAFETY: `reap_at_exit` is a plain `extern "C"` function with no
        // arguments, as `atexit(3)` requires.
        unsafe { libc::atexit(reap_at_exit) == 0 }
    });
}

#[cfg(not(unix))]
fn install_hook() {
    HOOK.get_or_init(|| false);
}
