//! Disposable PostgreSQL clusters for test suites.
//!
//! A [`TestCluster`] finds a local PostgreSQL installation, initialises a
//! throwaway cluster in a private temporary directory, starts a server on a
//! free loopback port and hands back connection details. Closing it, whether
//! explicitly, on drop, or at the end of [`TestCluster::scoped`], stops the
//! server and deletes every file it created.
//!
//! ```no_run
//! use pgtest::{ClusterConfig, TestCluster};
//!
//! let url = TestCluster::scoped(ClusterConfig::new(), |cluster| {
//!     // Connect with any client library here.
//!     cluster.url()
//! })??;
//! assert!(url.starts_with("postgresql://postgres@localhost:"));
//! # Ok::<(), pgtest::ClusterError>(())
//! ```
//!
//! The building blocks are public for callers that manage servers
//! themselves:
//!
//! - [`locator`] resolves `initdb`, `pg_ctl` and `postgres` from one
//!   installation.
//! - [`port`] draws ephemeral ports and retries on conflict.
//! - [`init`] prepares data directories.
//! - [`server`] starts and stops postmasters and detects readiness.
//!
//! Lifecycle events are emitted through `tracing`; see [`telemetry`] to print
//! them.

pub mod init;
pub mod locator;
pub mod port;
pub mod server;
pub mod telemetry;

mod cluster;
mod connection;
mod error;

pub use cluster::{ClusterConfig, LifecycleState, TestCluster};
pub use connection::ConnectionDescriptor;
pub use error::ClusterError;
pub use locator::{BinaryCache, BinaryPaths, LocateError, LocatorHints, Platform};
pub use pgtest_config::Settings;

#[cfg(test)]
mod tests;
