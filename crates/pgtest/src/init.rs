//! Creation of on-disk cluster directories.

use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, info};

const INIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::init");

/// Encoding passed to `initdb` unless overridden.
pub const DEFAULT_ENCODING: &str = "UTF8";
/// Locale passed to `initdb` unless overridden.
pub const DEFAULT_LOCALE: &str = "C";

/// Files a running postmaster leaves in its data directory. A template copied
/// while its server is up must not hand them to the new cluster.
const RUNTIME_FILES: [&str; 2] = ["postmaster.pid", "postmaster.opts"];

/// Errors raised while preparing a cluster directory.
#[derive(Debug, Error)]
pub enum InitError {
    /// The target directory already holds files.
    #[error("cluster directory {path:?} is not empty")]
    NotEmpty {
        /// Target directory.
        path: PathBuf,
    },
    /// A directory or file could not be created.
    #[error("failed to prepare {path:?}: {source}")]
    Prepare {
        /// Path being created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// `initdb` could not be spawned.
    #[error("failed to run initdb {binary:?}: {source}")]
    Launch {
        /// Binary invoked.
        binary: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// `initdb` exited unsuccessfully.
    #[error("initdb failed ({status}):\n{output}")]
    Failed {
        /// Exit status reported by the process.
        status: ExitStatus,
        /// Log file contents captured from the run.
        output: String,
    },
    /// The template directory is not a cluster.
    #[error("template {path:?} is not a PostgreSQL cluster (no PG_VERSION)")]
    InvalidTemplate {
        /// Template directory.
        path: PathBuf,
    },
    /// Copying the template failed.
    #[error("failed to copy {from:?} to {to:?}: {source}")]
    Copy {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Options forwarded to `initdb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    encoding: String,
    locale: String,
    extra_args: Vec<OsString>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_owned(),
            locale: DEFAULT_LOCALE.to_owned(),
            extra_args: Vec::new(),
        }
    }
}

impl InitOptions {
    /// Overrides the cluster encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Overrides the cluster locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Appends raw `initdb` arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Configured encoding.
    #[must_use]
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Configured locale.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }
}

/// Runs `initdb` against fresh directories.
#[derive(Debug, Clone)]
pub struct ClusterInitializer {
    initdb: PathBuf,
    options: InitOptions,
}

impl ClusterInitializer {
    /// Builds an initializer around the given `initdb` binary.
    #[must_use]
    pub fn new(initdb: impl Into<PathBuf>, options: InitOptions) -> Self {
        Self {
            initdb: initdb.into(),
            options,
        }
    }

    /// Creates `data_dir` and initializes a cluster owned by `superuser`.
    ///
    /// The directory must be absent or empty. `initdb` output is appended to
    /// `log_file`; on failure the whole log is returned in the error.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::NotEmpty`] for a populated directory,
    /// [`InitError::Launch`] when `initdb` cannot be spawned and
    /// [`InitError::Failed`] when it exits unsuccessfully.
    pub fn initialize(
        &self,
        data_dir: &Path,
        superuser: &str,
        log_file: &Path,
    ) -> Result<(), InitError> {
        prepare_empty_dir(data_dir)?;
        let (stdout, stderr) = open_log(log_file)?;
        let mut command = Command::new(&self.initdb);
        command
            .arg("-D")
            .arg(data_dir)
            .arg("-U")
            .arg(superuser)
            .args(["-A", "trust"])
            .arg("-E")
            .arg(&self.options.encoding)
            .arg(format!("--locale={}", self.options.locale))
            .args(&self.options.extra_args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        debug!(target: INIT_TARGET, command = ?command, "running initdb");

        let status = command.status().map_err(|source| InitError::Launch {
            binary: self.initdb.clone(),
            source,
        })?;
        if !status.success() {
            let output = fs::read_to_string(log_file).unwrap_or_default();
            return Err(InitError::Failed { status, output });
        }
        info!(
            target: INIT_TARGET,
            data_dir = %data_dir.display(),
            superuser,
            "cluster initialised"
        );
        Ok(())
    }
}

/// Copies an existing cluster into an empty `data_dir`.
///
/// The template's `postmaster.pid` and `postmaster.opts` are left behind.
///
/// # Errors
///
/// Returns [`InitError::InvalidTemplate`] when `template` has no
/// `PG_VERSION`, and [`InitError::Copy`] when any entry cannot be copied.
pub fn copy_template(template: &Path, data_dir: &Path) -> Result<(), InitError> {
    if !template.join("PG_VERSION").is_file() {
        return Err(InitError::InvalidTemplate {
            path: template.to_path_buf(),
        });
    }
    prepare_empty_dir(data_dir)?;
    copy_tree(template, data_dir)?;
    info!(
        target: INIT_TARGET,
        template = %template.display(),
        data_dir = %data_dir.display(),
        "cluster copied from template"
    );
    Ok(())
}

/// Returns `true` for names usable as a role or database identifier.
///
/// Names start with a letter or underscore, continue with ASCII letters,
/// digits or underscores, and must not use the reserved `pg_` prefix.
#[must_use]
pub fn is_valid_db_object_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("pg_")
}

fn prepare_empty_dir(dir: &Path) -> Result<(), InitError> {
    match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(InitError::NotEmpty {
                    path: dir.to_path_buf(),
                });
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(InitError::Prepare {
                path: dir.to_path_buf(),
                source,
            });
        }
    }
    create_private_dir(dir).map_err(|source| InitError::Prepare {
        path: dir.to_path_buf(),
        source,
    })
}

/// Creates `dir` and its parents, restricting `dir` itself to the owner.
pub(crate) fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(0o700);
        builder.create(dir)?;
        // The mode only applies to newly created directories.
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
    }
    #[cfg(not(unix))]
    {
        builder.create(dir)
    }
}

fn open_log(log_file: &Path) -> Result<(File, File), InitError> {
    let prepare = |source| InitError::Prepare {
        path: log_file.to_path_buf(),
        source,
    };
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(prepare)?;
    let stderr = stdout.try_clone().map_err(prepare)?;
    Ok((stdout, stderr))
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), InitError> {
    let copy_error = |source| InitError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    for item in fs::read_dir(from).map_err(copy_error)? {
        let entry = item.map_err(copy_error)?;
        let name = entry.file_name();
        if RUNTIME_FILES.iter().any(|runtime| name == *runtime) {
            continue;
        }
        let target = to.join(&name);
        let file_type = entry.file_type().map_err(copy_error)?;
        if file_type.is_dir() {
            create_private_dir(&target).map_err(|source| InitError::Copy {
                from: entry.path(),
                to: target.clone(),
                source,
            })?;
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|source| InitError::Copy {
                from: entry.path(),
                to: target.clone(),
                source,
            })?;
        }
        // Sockets and symlinks are skipped.
    }
    Ok(())
}
