//! Construction of the `pg_ctl` command lines.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::debug;

use super::error::ServerError;
use super::{SERVER_TARGET, ServerOptions, StartRequest};

/// Spawns `pg_ctl start` without waiting for the server.
pub(super) fn spawn_start(
    pg_ctl: &Path,
    postgres: &Path,
    request: &StartRequest,
    options: &ServerOptions,
) -> Result<Child, ServerError> {
    let mut command = Command::new(pg_ctl);
    command
        .arg("start")
        .arg("-W")
        .arg("-D")
        .arg(&request.data_dir)
        .arg("-l")
        .arg(&request.log_file)
        .arg("-p")
        .arg(postgres)
        .arg("-o")
        .arg(server_args(request, options));
    redirect_output(&mut command, &request.log_file)?;
    debug!(target: SERVER_TARGET, command = ?command, "spawning pg_ctl start");
    command.spawn().map_err(|source| ServerError::Launch {
        binary: pg_ctl.to_path_buf(),
        source,
    })
}

/// Builds the `pg_ctl stop` command for a fast shutdown bounded by `grace`.
pub(super) fn stop_command(
    pg_ctl: &Path,
    data_dir: &Path,
    log_file: &Path,
    grace: Duration,
) -> Command {
    let mut command = Command::new(pg_ctl);
    command
        .arg("stop")
        .arg("-D")
        .arg(data_dir)
        .args(["-m", "fast", "-w", "-t"])
        .arg(grace_seconds(grace).to_string());
    if redirect_output(&mut command, log_file).is_err() {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    command
}

/// Options handed to the postmaster through `pg_ctl -o`.
///
/// `-F` disables fsync; the cluster is disposable.
pub(super) fn server_args(request: &StartRequest, options: &ServerOptions) -> String {
    let mut args = vec![
        "-F".to_owned(),
        format!("-p {}", request.port),
        "-c listen_addresses=localhost".to_owned(),
        "-c logging_collector=off".to_owned(),
    ];
    if let Some(max) = options.max_connections {
        args.push(format!("-N {max}"));
    }
    args.extend(
        options
            .settings
            .iter()
            .map(|(key, value)| format!("-c {}", quote(&format!("{key}={value}")))),
    );
    if let Some(dir) = &request.socket_dir {
        args.push(format!("-k {}", quote(&dir.display().to_string())));
    }
    args.extend(options.extra_args.iter().cloned());
    args.join(" ")
}

/// `pg_ctl` hands `-o` to a shell; values with whitespace need quoting.
fn quote(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_owned()
    }
}

fn grace_seconds(grace: Duration) -> u64 {
    grace.as_secs().saturating_add(u64::from(grace.subsec_nanos() > 0)).max(1)
}

fn redirect_output(command: &mut Command, log_file: &Path) -> Result<(), ServerError> {
    let stdout = open_append(log_file)?;
    let stderr = stdout.try_clone().map_err(|source| ServerError::Log {
        path: log_file.to_path_buf(),
        source,
    })?;
    command.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    Ok(())
}

fn open_append(path: &Path) -> Result<File, ServerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ServerError::Log {
            path: path.to_path_buf(),
            source,
        })
}
