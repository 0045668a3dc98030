use once_cell::sync::OnceCell;

use super::{BinaryPaths, LocateError, LocatorHints, Platform, locate};

/// Write-once holder for a resolved [`BinaryPaths`].
///
/// Installations do not move while a test binary runs, so one lookup can
/// serve every cluster. The cache is an ordinary value: suites decide where
/// it lives (a fixture, a `static`, a test-support struct) and can build a
/// fresh one to reset it.
#[derive(Debug, Default)]
pub struct BinaryCache {
    cell: OnceCell<BinaryPaths>,
}

impl BinaryCache {
    /// Builds an empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Builds a cache pre-populated with known paths.
    #[must_use]
    pub fn with_paths(paths: BinaryPaths) -> Self {
        Self {
            cell: OnceCell::with_value(paths),
        }
    }

    /// Returns the cached paths, resolving them on first use.
    ///
    /// A failed lookup is not cached; the next call searches again.
    ///
    /// # Errors
    ///
    /// Whatever [`locate`] reports when nothing is cached yet.
    pub fn get_or_locate(
        &self,
        platform: Platform,
        hints: &LocatorHints,
    ) -> Result<&BinaryPaths, LocateError> {
        self.cell.get_or_try_init(|| locate(platform, hints))
    }

    /// Returns the cached paths without searching.
    #[must_use]
    pub fn get(&self) -> Option<&BinaryPaths> {
        self.cell.get()
    }
}
