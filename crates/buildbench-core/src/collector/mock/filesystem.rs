//! In-memory mock filesystem for testing `/proc` readers without Linux.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory so tests can simulate process
/// trees appearing, changing and disappearing between sampler ticks.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds `/proc/[pid]/stat` for a process with the given accounting values.
    ///
    /// `utime`/`stime`/`starttime` are in clock ticks, `rss_pages` in pages.
    pub fn add_process(
        &mut self,
        pid: u32,
        ppid: u32,
        comm: &str,
        utime: u64,
        stime: u64,
        starttime: u64,
        rss_pages: u64,
    ) {
        let stat = format!(
            "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 {starttime} 10485760 {rss_pages} 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0"
        );
        self.add_file(format!("/proc/{pid}/stat"), stat);
    }

    /// Removes every file and directory below `/proc/[pid]`.
    pub fn remove_process(&mut self, pid: u32) {
        let base = PathBuf::from(format!("/proc/{pid}"));
        self.files.retain(|path, _| !path.starts_with(&base));
        self.directories.retain(|path| !path.starts_with(&base));
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }
        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_process() {
        let mut fs = MockFs::new();
        fs.add_process(1234, 1, "make", 10, 5, 100, 256);

        assert!(fs.exists(Path::new("/proc/1234")));
        let stat = fs.read_to_string(Path::new("/proc/1234/stat")).unwrap();
        assert!(stat.starts_with("1234 (make) S 1 "));
    }

    #[test]
    fn test_mock_fs_read_dir() {
        let mut fs = MockFs::new();
        fs.add_process(1, 0, "init", 0, 0, 1, 10);
        fs.add_process(2, 1, "sh", 0, 0, 2, 10);
        fs.add_file("/proc/uptime", "100.0 50.0\n");

        let entries = fs.read_dir(Path::new("/proc")).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_mock_fs_remove_process() {
        let mut fs = MockFs::new();
        fs.add_process(42, 1, "cc1plus", 0, 0, 5, 10);
        fs.remove_process(42);

        assert!(!fs.exists(Path::new("/proc/42")));
        assert!(!fs.exists(Path::new("/proc/42/stat")));
        let err = fs.read_to_string(Path::new("/proc/42/stat")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
