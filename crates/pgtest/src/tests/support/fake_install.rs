//! Shell-script stand-ins for `initdb`, `pg_ctl` and `postgres`.
//!
//! Behaviour is selected through mode files next to the scripts, so the
//! scripts themselves are written once and never rewritten while a test may
//! be executing them. `pg_ctl start` launches the current test binary as a
//! fake postmaster (see `postmaster.rs`), which binds the requested port for
//! real.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::locator::{BinaryPaths, Platform};

use super::postmaster::{DATA_VAR, ENTRY_POINT, LOG_VAR, MODE_VAR, OPTS_VAR, RECORD_VAR};

const LAST_PID_FILE: &str = "postmaster.last";
const CALLS_FILE: &str = "pg_ctl.calls";

/// Writes a POSIX shell script and marks it executable.
pub fn write_executable(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create script directory");
    }
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
}

/// How the fake `initdb` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitBehaviour {
    /// Creates the directory and a `PG_VERSION` file.
    Succeed,
    /// Prints an error and exits 1.
    Fail,
}

/// How the fake `pg_ctl start` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehaviour {
    /// Fake postmaster binds the port and reports readiness.
    Ready,
    /// Fake postmaster writes its pid and never becomes ready.
    Hang,
    /// Fake postmaster writes its pid and exits.
    Crash,
    /// `pg_ctl` itself exits 1.
    ExitFailure,
    /// Fake postmaster reports a failed bind.
    Conflict,
    /// The first start conflicts; later ones behave like `Ready`.
    ConflictOnce,
}

/// How the fake `pg_ctl stop` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehaviour {
    /// Sends SIGTERM to the recorded postmaster.
    Graceful,
    /// Exits 1 without touching the postmaster.
    Ignore,
}

/// A directory holding a complete fake PostgreSQL installation.
#[derive(Debug)]
pub struct FakeInstall {
    dir: PathBuf,
    paths: BinaryPaths,
}

impl FakeInstall {
    /// Writes the fake tools into `dir`.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        let dir = location.into();
        let exe = env::current_exe().expect("resolve test binary");
        write_executable(&dir.join("initdb"), INITDB_SCRIPT);
        write_executable(&dir.join("pg_ctl"), &pg_ctl_script(&exe));
        write_executable(&dir.join("postgres"), "exit 0\n");
        let paths =
            BinaryPaths::from_dir(&dir, Platform::current()).expect("fake install is complete");
        Self { dir, paths }
    }

    /// Selects the `initdb` behaviour.
    #[must_use]
    pub fn with_initdb(self, behaviour: InitBehaviour) -> Self {
        let mode = match behaviour {
            InitBehaviour::Succeed => "ok",
            InitBehaviour::Fail => "fail",
        };
        self.write_mode("initdb.mode", mode);
        self
    }

    /// Selects the `pg_ctl start` behaviour.
    #[must_use]
    pub fn with_start(self, behaviour: StartBehaviour) -> Self {
        let mode = match behaviour {
            StartBehaviour::Ready => "ready",
            StartBehaviour::Hang => "hang",
            StartBehaviour::Crash => "crash",
            StartBehaviour::ExitFailure => "exit",
            StartBehaviour::Conflict => "conflict",
            StartBehaviour::ConflictOnce => "conflict-once",
        };
        self.write_mode("start.mode", mode);
        self
    }

    /// Selects the `pg_ctl stop` behaviour.
    #[must_use]
    pub fn with_stop(self, behaviour: StopBehaviour) -> Self {
        let mode = match behaviour {
            StopBehaviour::Graceful => "graceful",
            StopBehaviour::Ignore => "ignore",
        };
        self.write_mode("stop.mode", mode);
        self
    }

    /// Paths to the fake tools.
    pub const fn paths(&self) -> &BinaryPaths {
        &self.paths
    }

    /// Directory holding the fake tools.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pid of the most recently launched fake postmaster.
    pub fn last_postmaster_pid(&self) -> Option<i32> {
        fs::read_to_string(self.dir.join(LAST_PID_FILE))
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }

    /// Number of `pg_ctl start` invocations so far.
    pub fn start_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.starts_with("start"))
            .count()
    }

    /// Ports passed to `pg_ctl start`, in call order.
    pub fn start_ports(&self) -> Vec<u16> {
        self.calls()
            .iter()
            .filter(|line| line.starts_with("start"))
            .filter_map(|line| super::postmaster::port_from_options(line))
            .collect()
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.join(CALLS_FILE))
            .map(|content| content.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    fn write_mode(&self, file: &str, mode: &str) {
        fs::write(self.dir.join(file), mode).expect("write fake mode");
    }
}

const INITDB_SCRIPT: &str = r#"here=$(cd "$(dirname "$0")" && pwd)
echo "initdb $*"
mode=$(cat "$here/initdb.mode" 2>/dev/null || echo ok)
if [ "$mode" = fail ]; then
  echo "initdb: simulated failure" >&2
  exit 1
fi
data=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$data" && echo 16 > "$data/PG_VERSION"
"#;

fn pg_ctl_script(exe: &Path) -> String {
    format!(
        r#"here=$(cd "$(dirname "$0")" && pwd)
cmd="$1"
shift
data=""
log=""
opts=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    -l) log="$2"; shift 2 ;;
    -o) opts="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "$cmd $opts" >> "$here/{CALLS_FILE}"
case "$cmd" in
  start)
    mode=$(cat "$here/start.mode" 2>/dev/null || echo ready)
    if [ "$mode" = exit ]; then
      echo "pg_ctl: simulated launch failure" >> "$log"
      exit 1
    fi
    if [ "$mode" = conflict-once ]; then
      if [ -f "$here/conflicted" ]; then
        mode=ready
      else
        touch "$here/conflicted"
        mode=conflict
      fi
    fi
    {MODE_VAR}="$mode" {DATA_VAR}="$data" {LOG_VAR}="$log" {OPTS_VAR}="$opts" \
      {RECORD_VAR}="$here/{LAST_PID_FILE}" \
      "{exe}" --exact {ENTRY_POINT} --nocapture --test-threads=1 >/dev/null 2>&1 &
    exit 0
    ;;
  stop)
    mode=$(cat "$here/stop.mode" 2>/dev/null || echo graceful)
    if [ "$mode" = ignore ]; then
      exit 1
    fi
    pid=$(head -n 1 "$data/postmaster.pid" 2>/dev/null)
    if [ -n "$pid" ]; then
      kill "$pid" 2>/dev/null
    fi
    rm -f "$data/postmaster.pid"
    exit 0
    ;;
esac
exit 0
"#,
        exe = exe.display(),
    )
}
