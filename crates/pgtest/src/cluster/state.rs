//! Lifecycle states reported by [`crate::TestCluster::state`].

use serde::Serialize;

/// Where a [`crate::TestCluster`] is in its life.
///
/// `Starting` may be re-entered while fresh ports are tried. `Failed` is
/// absorbing: a cluster that failed never runs again, though closing it is
/// still allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// Configured; nothing exists on disk.
    Created,
    /// The data directory holds an initialised cluster.
    Initialized,
    /// The server is being launched.
    Starting,
    /// The server accepts connections.
    Running,
    /// The server is being stopped.
    Stopping,
    /// The server is gone and the directory has been reclaimed.
    Stopped,
    /// Launch or teardown failed.
    Failed,
}

impl LifecycleState {
    /// Returns `true` when no further transition is possible except cleanup.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}
