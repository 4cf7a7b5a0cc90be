//! The filesystem seam shared by `/proc` sampling, host detection and test
//! resolution.

use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of the filesystem.
///
/// [`RealFs`] backs it with `std::fs`; [`MockFs`](super::MockFs) with an
/// in-memory tree of process and build-directory entries.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;

    /// Full paths of the entries of a directory, in no particular order.
    ///
    /// Fails when `path` is not a directory; callers use that to tell
    /// directories from files.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        // Entries of /proc vanish while being listed; skip those.
        Ok(std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect())
    }
}
