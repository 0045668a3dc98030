//! Discovery of the PostgreSQL tools a cluster needs.
//!
//! [`locate`] is a pure function of a [`Platform`] and a set of
//! [`LocatorHints`]: it inspects the filesystem but never reads the process
//! environment. The first directory holding all of `initdb`, `pg_ctl` and
//! `postgres` as executables wins, so the three tools always come from one
//! installation. Explicit overrides are authoritative: an inconsistent
//! override fails instead of silently falling back to another install.

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

mod cache;
mod platform;

pub use cache::BinaryCache;
pub use platform::{Platform, SearchRoot};

const LOCATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::locator");

/// The three tools required to run a throwaway cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Tool {
    /// Cluster initialisation tool.
    #[strum(serialize = "initdb")]
    InitDb,
    /// Server control tool.
    #[strum(serialize = "pg_ctl")]
    PgCtl,
    /// Server daemon.
    #[strum(serialize = "postgres")]
    Postgres,
}

impl Tool {
    const ALL: [Self; 3] = [Self::InitDb, Self::PgCtl, Self::Postgres];

    /// Executable file name on `platform`.
    #[must_use]
    pub fn file_name(self, platform: Platform) -> String {
        format!("{self}{}", platform.executable_suffix())
    }
}

/// Validated paths to one consistent PostgreSQL installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryPaths {
    root: PathBuf,
    initdb: PathBuf,
    pg_ctl: PathBuf,
    postgres: PathBuf,
}

impl BinaryPaths {
    /// Validates that `dir` holds every required tool.
    ///
    /// # Errors
    ///
    /// [`LocateError::Incomplete`] naming each tool that is absent or not
    /// executable.
    pub fn from_dir(dir: &Path, platform: Platform) -> Result<Self, LocateError> {
        let missing = missing_tools(dir, platform);
        if !missing.is_empty() {
            return Err(LocateError::Incomplete {
                dir: dir.to_path_buf(),
                missing,
            });
        }
        Ok(Self::assume_complete(dir, platform))
    }

    fn assume_complete(dir: &Path, platform: Platform) -> Self {
        Self {
            root: dir.to_path_buf(),
            initdb: dir.join(Tool::InitDb.file_name(platform)),
            pg_ctl: dir.join(Tool::PgCtl.file_name(platform)),
            postgres: dir.join(Tool::Postgres.file_name(platform)),
        }
    }

    /// Directory shared by all three tools.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Path to `initdb`.
    #[must_use]
    pub fn initdb(&self) -> &Path {
        self.initdb.as_path()
    }

    /// Path to `pg_ctl`.
    #[must_use]
    pub fn pg_ctl(&self) -> &Path {
        self.pg_ctl.as_path()
    }

    /// Path to the `postgres` daemon.
    #[must_use]
    pub fn postgres(&self) -> &Path {
        self.postgres.as_path()
    }
}

/// Caller-supplied inputs to [`locate`].
#[derive(Debug, Clone, Default)]
pub struct LocatorHints {
    bin_dir: Option<PathBuf>,
    pg_ctl: Option<PathBuf>,
    path_var: Option<OsString>,
    roots: Option<Vec<SearchRoot>>,
}

impl LocatorHints {
    /// Hints with no overrides and no `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hints seeded with the current `PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            path_var: env::var_os("PATH"),
            ..Self::default()
        }
    }

    /// Searches this directory first and nothing else.
    #[must_use]
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    /// Uses the directory holding this `pg_ctl` and nothing else.
    #[must_use]
    pub fn with_pg_ctl(mut self, pg_ctl: impl Into<PathBuf>) -> Self {
        self.pg_ctl = Some(pg_ctl.into());
        self
    }

    /// Replaces the `PATH` value searched after the overrides.
    #[must_use]
    pub fn with_path_var(mut self, path_var: impl Into<OsString>) -> Self {
        self.path_var = Some(path_var.into());
        self
    }

    /// Replaces the platform's install locations.
    #[must_use]
    pub fn with_search_roots(mut self, roots: Vec<SearchRoot>) -> Self {
        self.roots = Some(roots);
        self
    }

    fn override_dir(&self) -> Result<Option<PathBuf>, LocateError> {
        if let Some(dir) = &self.bin_dir {
            return Ok(Some(dir.clone()));
        }
        let Some(pg_ctl) = &self.pg_ctl else {
            return Ok(None);
        };
        if !is_executable(pg_ctl) {
            return Err(LocateError::OverrideNotExecutable {
                path: pg_ctl.clone(),
            });
        }
        match pg_ctl.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => Ok(Some(parent.to_path_buf())),
            None => Err(LocateError::OverrideWithoutParent {
                path: pg_ctl.clone(),
            }),
        }
    }
}

/// Errors raised while resolving [`BinaryPaths`].
#[derive(Debug, Error)]
pub enum LocateError {
    /// No searched directory held a complete installation.
    #[error(
        "PostgreSQL binaries (initdb, pg_ctl, postgres) not found; searched: {}",
        display_paths(.attempted)
    )]
    NotFound {
        /// Directories inspected, in search order.
        attempted: Vec<PathBuf>,
    },
    /// A directory lacked some of the required tools.
    #[error("{dir:?} is missing {}", .missing.join(", "))]
    Incomplete {
        /// Directory inspected.
        dir: PathBuf,
        /// Names of the absent or non-executable tools.
        missing: Vec<String>,
    },
    /// The `pg_ctl` override does not point at an executable.
    #[error("pg_ctl override {path:?} is not an executable file")]
    OverrideNotExecutable {
        /// Configured path.
        path: PathBuf,
    },
    /// The `pg_ctl` override has no parent directory.
    #[error("pg_ctl override {path:?} has no parent directory")]
    OverrideWithoutParent {
        /// Configured path.
        path: PathBuf,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves a consistent set of PostgreSQL binaries.
///
/// Search order: the override directory (or the directory of the `pg_ctl`
/// override), then each `PATH` entry, then the platform's install roots.
///
/// # Errors
///
/// Override problems are reported as such and stop the search. Otherwise
/// [`LocateError::NotFound`] lists every directory that was tried.
pub fn locate(platform: Platform, hints: &LocatorHints) -> Result<BinaryPaths, LocateError> {
    if let Some(dir) = hints.override_dir()? {
        let paths = BinaryPaths::from_dir(&dir, platform)?;
        info!(
            target: LOCATOR_TARGET,
            root = %paths.root().display(),
            "using overridden PostgreSQL installation"
        );
        return Ok(paths);
    }

    let mut attempted = Vec::new();
    let mut seen = HashSet::new();
    for dir in candidate_dirs(platform, hints) {
        if !seen.insert(dir.clone()) {
            continue;
        }
        if missing_tools(&dir, platform).is_empty() {
            info!(
                target: LOCATOR_TARGET,
                root = %dir.display(),
                %platform,
                "located PostgreSQL installation"
            );
            return Ok(BinaryPaths::assume_complete(&dir, platform));
        }
        debug!(target: LOCATOR_TARGET, dir = %dir.display(), "no complete installation");
        attempted.push(dir);
    }
    Err(LocateError::NotFound { attempted })
}

fn candidate_dirs(platform: Platform, hints: &LocatorHints) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = hints
        .path_var
        .as_deref()
        .map(|path_var| {
            env::split_paths(path_var)
                .map(|entry| unquote(&entry))
                .filter(|entry| !entry.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default();
    let roots = hints
        .roots
        .clone()
        .unwrap_or_else(|| platform.search_roots());
    dirs.extend(roots.iter().flat_map(SearchRoot::expand));
    dirs
}

/// Windows `PATH` entries are sometimes wrapped in double quotes.
fn unquote(entry: &Path) -> PathBuf {
    entry.to_str().map_or_else(
        || entry.to_path_buf(),
        |text| PathBuf::from(text.trim_matches('"')),
    )
}

fn missing_tools(dir: &Path, platform: Platform) -> Vec<String> {
    Tool::ALL
        .iter()
        .map(|tool| tool.file_name(platform))
        .filter(|name| !is_executable(&dir.join(name)))
        .collect()
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
}
