//! Shared state for the cluster lifecycle scenarios.

use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use super::{FakeInstall, InitBehaviour, StartBehaviour, StopBehaviour};
use crate::port::allocate;
use crate::server::process::is_alive;
use crate::{ClusterConfig, ClusterError, TestCluster};

/// A fake installation plus whatever the scenario has started.
pub struct ClusterWorld {
    scratch: TempDir,
    install: Option<FakeInstall>,
    config: ClusterConfig,
    cluster: Option<TestCluster>,
    error: Option<ClusterError>,
    port: Option<u16>,
    base: Option<PathBuf>,
    occupant: Option<TcpListener>,
}

impl ClusterWorld {
    /// Creates an empty world with a fresh fake installation.
    pub fn new() -> Self {
        let scratch = TempDir::new().expect("create scenario dir");
        let bases = scratch.path().join("bases");
        fs::create_dir_all(&bases).expect("create bases dir");
        let install = FakeInstall::new(scratch.path().join("bin"));
        let config = ClusterConfig::new()
            .binaries(install.paths().clone())
            .base_dir(bases);
        Self {
            scratch,
            install: Some(install),
            config,
            cluster: None,
            error: None,
            port: None,
            base: None,
            occupant: None,
        }
    }

    const fn install(&self) -> &FakeInstall {
        self.install.as_ref().expect("fake installation")
    }

    fn reconfigure_install(&mut self, change: impl FnOnce(FakeInstall) -> FakeInstall) {
        let install = self.install.take().expect("fake installation");
        self.install = Some(change(install));
    }

    fn reconfigure(&mut self, change: impl FnOnce(ClusterConfig) -> ClusterConfig) {
        self.config = change(self.config.clone());
    }

    /// Selects the fake `initdb` behaviour.
    pub fn set_initdb(&mut self, behaviour: InitBehaviour) {
        self.reconfigure_install(|install| install.with_initdb(behaviour));
    }

    /// Selects the fake `pg_ctl start` behaviour.
    pub fn set_start(&mut self, behaviour: StartBehaviour) {
        self.reconfigure_install(|install| install.with_start(behaviour));
    }

    /// Selects the fake `pg_ctl stop` behaviour.
    pub fn set_stop(&mut self, behaviour: StopBehaviour) {
        self.reconfigure_install(|install| install.with_stop(behaviour));
    }

    /// Bounds the number of ports tried.
    pub fn set_max_port_attempts(&mut self, attempts: u32) {
        self.reconfigure(|config| config.max_port_attempts(attempts));
    }

    /// Shortens the startup timeout.
    pub fn set_startup_timeout(&mut self, timeout: Duration) {
        self.reconfigure(|config| config.startup_timeout(timeout));
    }

    /// Keeps the directory after close.
    pub fn retain_on_close(&mut self) {
        self.reconfigure(|config| config.retain_on_close(true));
    }

    /// Pins the cluster to a port another listener already holds.
    pub fn occupy_pinned_port(&mut self) {
        let port = allocate().expect("allocate port");
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).expect("occupy port");
        self.occupant = Some(listener);
        self.reconfigure(|config| config.port(port));
    }

    /// Port held by the competing listener.
    pub fn pinned_port(&self) -> u16 {
        self.occupant
            .as_ref()
            .expect("pinned port should be occupied")
            .local_addr()
            .expect("listener address")
            .port()
    }

    /// Creates and launches a cluster, keeping it even when launch fails.
    pub fn start(&mut self) {
        let mut cluster = TestCluster::new(self.config.clone());
        match cluster.launch() {
            Ok(()) => {
                self.port = cluster.port().ok();
                self.base = cluster.base_dir().ok().map(PathBuf::from);
                self.error = None;
            }
            Err(error) => self.error = Some(error),
        }
        self.cluster = Some(cluster);
    }

    /// Closes the cluster, panicking on failure.
    pub fn close(&mut self) {
        self.cluster_mut().close().expect("close cluster");
    }

    /// The scenario's cluster.
    pub const fn cluster(&self) -> &TestCluster {
        self.cluster.as_ref().expect("cluster should be started")
    }

    const fn cluster_mut(&mut self) -> &mut TestCluster {
        self.cluster.as_mut().expect("cluster should be started")
    }

    /// The launch error, if launch failed.
    pub const fn error(&self) -> &ClusterError {
        self.error.as_ref().expect("launch should have failed")
    }

    /// Port the cluster ran on.
    pub const fn port(&self) -> u16 {
        self.port.expect("cluster should have run")
    }

    /// Base directory the cluster ran in.
    pub const fn base(&self) -> &PathBuf {
        self.base.as_ref().expect("cluster should have run")
    }

    /// Number of cluster directories left under the scenario's base.
    pub fn leftover_dirs(&self) -> usize {
        fs::read_dir(self.scratch.path().join("bases"))
            .expect("read bases dir")
            .count()
    }

    /// Number of `pg_ctl start` invocations.
    pub fn start_attempts(&self) -> usize {
        self.install().start_attempts()
    }

    /// Returns `true` when the last fake postmaster is still running.
    pub fn postmaster_alive(&self) -> bool {
        self.install().last_postmaster_pid().is_some_and(is_alive)
    }
}

impl Drop for ClusterWorld {
    fn drop(&mut self) {
        if let Some(mut cluster) = self.cluster.take()
            && let Err(error) = cluster.close()
        {
            eprintln!("scenario cleanup failed: {error}");
        }
    }
}
