//! A fake postmaster hosted by the test binary itself.
//!
//! The fake `pg_ctl start` re-executes the running test binary, filtered down
//! to [`fake_postmaster`], with the startup parameters in environment
//! variables. Outside that re-execution the test returns immediately.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

pub(super) const MODE_VAR: &str = "PGTEST_FAKE_MODE";
pub(super) const DATA_VAR: &str = "PGTEST_FAKE_DATA";
pub(super) const LOG_VAR: &str = "PGTEST_FAKE_LOG";
pub(super) const OPTS_VAR: &str = "PGTEST_FAKE_OPTS";
pub(super) const RECORD_VAR: &str = "PGTEST_FAKE_RECORD";
pub(super) const ENTRY_POINT: &str = "tests::support::postmaster::fake_postmaster";

/// Upper bound on how long an orphaned fake survives.
const LIFETIME: Duration = Duration::from_secs(120);

/// Extracts the `-p <port>` value from postmaster options.
pub(super) fn port_from_options(options: &str) -> Option<u16> {
    let mut words = options.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-p" {
            return words.next()?.parse().ok();
        }
    }
    None
}

#[test]
fn fake_postmaster() {
    let Some(mode) = env::var(MODE_VAR).ok() else {
        return;
    };
    let data_var = env::var_os(DATA_VAR).expect("data dir variable");
    let data = Path::new(&data_var);
    let log_var = env::var_os(LOG_VAR).expect("log file variable");
    let log = Path::new(&log_var);
    let options = env::var(OPTS_VAR).unwrap_or_default();
    let port = port_from_options(&options).expect("port in postmaster options");

    let pid = std::process::id();
    write_pid_file(data, pid).expect("write postmaster.pid");
    if let Some(record) = env::var_os(RECORD_VAR) {
        fs::write(record, pid.to_string()).expect("record fake pid");
    }

    match mode.as_str() {
        "hang" => {
            append(log, "LOG:  starting PostgreSQL (fake)");
            linger();
        }
        "crash" => {
            append(log, "FATAL:  simulated postmaster crash");
        }
        "conflict" => report_conflict(data, log),
        _ => match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                append(log, "LOG:  database system is ready to accept connections");
                serve(&listener);
            }
            Err(_) => report_conflict(data, log),
        },
    }
}

fn write_pid_file(data: &Path, pid: u32) -> io::Result<()> {
    let staging = data.join("postmaster.pid.tmp");
    fs::write(&staging, format!("{pid}\n{}\n", data.display()))?;
    fs::rename(staging, data.join("postmaster.pid"))
}

fn report_conflict(data: &Path, log: &Path) {
    append(
        log,
        "LOG:  could not bind IPv4 address \"127.0.0.1\": Address already in use",
    );
    append(log, "FATAL:  could not create any TCP/IP sockets");
    fs::remove_file(data.join("postmaster.pid")).expect("remove postmaster.pid");
}

fn append(log: &Path, line: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .expect("open fake server log");
    writeln!(file, "{line}").expect("write fake server log");
}

fn serve(listener: &TcpListener) {
    listener
        .set_nonblocking(true)
        .expect("non-blocking listener");
    let deadline = Instant::now() + LIFETIME;
    while Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, _)) => drop(stream),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return,
        }
    }
}

fn linger() {
    let deadline = Instant::now() + LIFETIME;
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::port_from_options;
    use rstest::rstest;

    #[rstest]
    #[case::server_args("-F -p 54321 -c listen_addresses=localhost", Some(54321))]
    #[case::calls_line("start -F -p 6000", Some(6000))]
    #[case::missing("-F -c fsync=off", None)]
    #[case::dangling("-F -p", None)]
    fn reads_port_option(#[case] options: &str, #[case] expected: Option<u16>) {
        assert_eq!(port_from_options(options), expected);
    }
}
