//! Memory and CPU sampling across a process and all its descendants.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use super::parser::{ProcStat, parse_proc_stat};
use crate::collector::traits::FileSystem;
use crate::monitor::LiveStats;

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: u64 = 100;

/// Page size used to convert RSS pages to bytes.
const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    starttime: u64,
    ticks: u64,
}

/// Samples a process tree from `/proc`, one tick at a time.
///
/// CPU percent is derived from the change in user+system ticks since the
/// previous call, so a process seen for the first time contributes 0%.
pub struct ProcessTreeSampler<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    prev: HashMap<u32, CpuReading>,
}

impl<F: FileSystem> ProcessTreeSampler<F> {
    /// Creates a sampler reading from `proc_path` (usually "/proc").
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            prev: HashMap::new(),
        }
    }

    /// Mutable access to the filesystem, for tests that evolve a scenario.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    /// Reads every process currently visible. Processes that vanish while
    /// being read are skipped.
    fn read_processes(&self) -> HashMap<u32, ProcStat> {
        let entries = match self.fs.read_dir(&self.proc_path) {
            Ok(entries) => entries,
            Err(e) => {
                trace!("cannot list {}: {}", self.proc_path.display(), e);
                return HashMap::new();
            }
        };

        let mut processes = HashMap::new();
        for entry in entries {
            let Some(pid) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(content) = self.fs.read_to_string(&entry.join("stat")) else {
                continue;
            };
            match parse_proc_stat(&content) {
                Ok(stat) => {
                    processes.insert(pid, stat);
                }
                Err(e) => trace!("skipping pid {}: {}", pid, e),
            }
        }
        processes
    }

    /// Returns `root` and every descendant of it present in `processes`.
    fn descendants(root: u32, processes: &HashMap<u32, ProcStat>) -> Vec<u32> {
        if !processes.contains_key(&root) {
            return Vec::new();
        }

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for stat in processes.values() {
            if stat.pid != stat.ppid {
                children.entry(stat.ppid).or_default().push(stat.pid);
            }
        }

        let mut tree = vec![root];
        let mut idx = 0;
        while idx < tree.len() {
            if let Some(kids) = children.get(&tree[idx]) {
                tree.extend(kids.iter().copied().filter(|pid| *pid != root));
            }
            idx += 1;
        }
        tree
    }

    /// Takes one sample of `root` and its current descendants.
    ///
    /// `elapsed` is the time since the previous call; it scales the CPU
    /// tick delta into a percentage.
    pub fn sample(&mut self, root: u32, elapsed: Duration) -> LiveStats {
        let processes = self.read_processes();
        let tree = Self::descendants(root, &processes);

        let elapsed_secs = elapsed.as_secs_f64();
        let mut stats = LiveStats::default();
        let mut next = HashMap::with_capacity(tree.len());

        for pid in tree {
            let stat = &processes[&pid];
            trace!("pid {} ({}): rss {} pages", pid, stat.comm, stat.rss);
            stats.memory += stat.rss.max(0) as u64 * PAGE_SIZE;

            let reading = CpuReading {
                starttime: stat.starttime,
                ticks: stat.utime + stat.stime,
            };
            if let Some(prev) = self.prev.get(&pid)
                && prev.starttime == reading.starttime
                && elapsed_secs > 0.0
            {
                let delta = reading.ticks.saturating_sub(prev.ticks);
                stats.cpu_percent += delta as f64 / CLK_TCK as f64 / elapsed_secs * 100.0;
            }
            next.insert(pid, reading);
        }

        self.prev = next;
        stats
    }
}
