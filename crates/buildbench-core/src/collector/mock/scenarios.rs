//! Pre-built `/proc` states for process-tree tests.

use super::filesystem::MockFs;

impl MockFs {
    /// A build driver with a compiler subtree plus an unrelated process.
    ///
    /// ```text
    /// 1 init
    /// ├── 100 make        (rss 1000 pages)
    /// │   └── 101 sh      (rss  200 pages)
    /// │       └── 102 cc1plus (rss 5000 pages)
    /// └── 200 sshd        (rss 3000 pages, not part of the tree)
    /// ```
    pub fn build_tree() -> Self {
        let mut fs = Self::new();
        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_process(1, 0, "init", 50, 50, 1, 2000);
        fs.add_process(100, 1, "make", 100, 20, 5000, 1000);
        fs.add_process(101, 100, "sh", 1, 1, 5001, 200);
        fs.add_process(102, 101, "cc1plus", 400, 40, 5002, 5000);
        fs.add_process(200, 1, "sshd", 10, 10, 300, 3000);
        fs
    }

    /// A process whose `/proc` directory exists but whose `stat` is gone,
    /// as seen when a child exits between enumeration and reading.
    pub fn with_vanished_child() -> Self {
        let mut fs = Self::build_tree();
        fs.remove_process(102);
        fs.add_dir("/proc/102");
        fs
    }

    /// A process whose children have names containing spaces and parentheses.
    pub fn with_special_names() -> Self {
        let mut fs = Self::new();
        fs.add_process(300, 1, "python3", 10, 0, 700, 400);
        fs.add_process(301, 300, "Web Content", 10, 0, 701, 100);
        fs.add_process(302, 300, "weird) (name", 10, 0, 702, 100);
        fs
    }
}
