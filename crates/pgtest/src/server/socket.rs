//! Reachability checks for the server's TCP port and Unix socket.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use super::error::ServerError;

const SOCKET_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Checks whether something accepts connections on `127.0.0.1:<port>`.
pub(crate) fn port_is_reachable(port: u16) -> Result<bool, ServerError> {
    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    classify(
        TcpStream::connect_timeout(&address, SOCKET_CHECK_TIMEOUT).map(|_| ()),
        || address.to_string(),
    )
}

/// Checks whether the server's Unix socket `<dir>/.s.PGSQL.<port>` accepts
/// connections.
pub(crate) fn unix_socket_is_reachable(dir: &Path, port: u16) -> Result<bool, ServerError> {
    let path = dir.join(format!(".s.PGSQL.{port}"));
    classify(connect_unix(&path), || path.display().to_string())
}

fn classify(
    outcome: io::Result<()>,
    endpoint: impl FnOnce() -> String,
) -> Result<bool, ServerError> {
    match outcome {
        Ok(()) => Ok(true),
        Err(error) if is_socket_available(&error) => Ok(false),
        Err(source) => Err(ServerError::SocketCheck {
            endpoint: endpoint(),
            source,
        }),
    }
}

#[cfg(unix)]
fn connect_unix(path: &Path) -> io::Result<()> {
    use socket2::{Domain, SockAddr, Socket, Type};

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, SOCKET_CHECK_TIMEOUT)
}

#[cfg(not(unix))]
fn connect_unix(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "unix sockets unsupported on this platform",
    ))
}

/// Returns `true` for errors meaning nothing is listening.
///
/// `ConnectionReset` is excluded: a peer accepted and then closed, so the
/// endpoint is in use.
fn is_socket_available(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
    )
}
