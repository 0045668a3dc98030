//! Platform-specific install locations for PostgreSQL binaries.

use std::fs;
use std::path::{Path, PathBuf};

/// Operating system family used to pick install locations and file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    /// Debian, Ubuntu, RHEL and other Linux distributions.
    Linux,
    /// macOS with Homebrew or Postgres.app.
    MacOs,
    /// Windows with the EnterpriseDB installer.
    Windows,
    /// Any other Unix; only `PATH` and generic locations are searched.
    Other,
}

impl Platform {
    /// Platform the current binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Other
        }
    }

    /// Suffix appended to executable names.
    #[must_use]
    pub const fn executable_suffix(self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            Self::Linux | Self::MacOs | Self::Other => "",
        }
    }

    /// Known install roots in priority order.
    #[must_use]
    pub fn search_roots(self) -> Vec<SearchRoot> {
        match self {
            Self::Linux => vec![
                SearchRoot::versioned("/usr/lib/postgresql", "", "bin"),
                SearchRoot::versioned("/usr", "pgsql-", "bin"),
                SearchRoot::fixed("/usr/local/pgsql/bin"),
                SearchRoot::fixed("/usr/local/bin"),
                SearchRoot::fixed("/usr/bin"),
            ],
            Self::MacOs => vec![
                SearchRoot::versioned("/opt/homebrew/opt", "postgresql@", "bin"),
                SearchRoot::fixed("/opt/homebrew/bin"),
                SearchRoot::versioned("/usr/local/opt", "postgresql@", "bin"),
                SearchRoot::fixed("/usr/local/bin"),
                SearchRoot::fixed("/Applications/Postgres.app/Contents/Versions/latest/bin"),
            ],
            Self::Windows => vec![SearchRoot::versioned(
                r"C:\Program Files\PostgreSQL",
                "",
                "bin",
            )],
            Self::Other => vec![
                SearchRoot::fixed("/usr/local/pgsql/bin"),
                SearchRoot::fixed("/usr/local/bin"),
                SearchRoot::fixed("/usr/bin"),
            ],
        }
    }
}

/// A location that may hold an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRoot {
    /// A single directory.
    Fixed(PathBuf),
    /// `<parent>/<prefix><version>/<suffix>`, tried from the highest version down.
    Versioned {
        /// Directory whose entries carry version numbers.
        parent: PathBuf,
        /// Text preceding the version in each entry name.
        prefix: String,
        /// Path joined below the versioned entry.
        suffix: PathBuf,
    },
}

impl SearchRoot {
    /// Builds a fixed root.
    #[must_use]
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        Self::Fixed(path.into())
    }

    /// Builds a versioned root.
    #[must_use]
    pub fn versioned(
        parent: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<PathBuf>,
    ) -> Self {
        Self::Versioned {
            parent: parent.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Expands the root into concrete directories, best candidate first.
    ///
    /// Unreadable or missing parents expand to nothing.
    #[must_use]
    pub fn expand(&self) -> Vec<PathBuf> {
        match self {
            Self::Fixed(path) => vec![path.clone()],
            Self::Versioned {
                parent,
                prefix,
                suffix,
            } => expand_versioned(parent, prefix, suffix),
        }
    }
}

fn expand_versioned(parent: &Path, prefix: &str, suffix: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut versions: Vec<(Vec<u32>, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let version = name.to_str()?.strip_prefix(prefix)?;
            let parsed = parse_version(version)?;
            Some((parsed, entry.path().join(suffix)))
        })
        .collect();
    versions.sort_by(|left, right| right.0.cmp(&left.0));
    versions.into_iter().map(|(_, path)| path).collect()
}

/// Parses `15`, `9.6` or `16.2` into comparable components.
pub(crate) fn parse_version(text: &str) -> Option<Vec<u32>> {
    if text.is_empty() {
        return None;
    }
    text.split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect()
}
