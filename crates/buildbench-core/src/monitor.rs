//! Live process monitor.
//!
//! Polls a running process tree on a background thread and publishes the
//! latest memory and CPU totals. Used for processes whose exit-time
//! accounting alone is not enough, such as long-running benchmarks.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::{FileSystem, ProcessTreeSampler, RealFs};

/// Default interval between two samples of the process tree.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Approximate resource usage of a running process tree.
///
/// Both values are sums over the process and all descendants alive at the
/// time of the tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveStats {
    /// Resident memory in bytes.
    pub memory: u64,
    /// CPU utilisation in percent of one core.
    pub cpu_percent: f64,
}

/// Lock-free storage for the values published by the polling thread.
///
/// Each field is updated atomically on its own; a reader may observe memory
/// from one tick and CPU from the next.
#[derive(Debug, Default)]
struct SharedStats {
    memory: AtomicU64,
    cpu_percent: AtomicU64,
    peak_memory: AtomicU64,
    peak_cpu_percent: AtomicU64,
}

impl SharedStats {
    fn publish(&self, stats: LiveStats) {
        self.memory.store(stats.memory, Ordering::Release);
        self.cpu_percent
            .store(stats.cpu_percent.to_bits(), Ordering::Release);
        self.peak_memory.fetch_max(stats.memory, Ordering::AcqRel);
        let _ = self
            .peak_cpu_percent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (stats.cpu_percent > f64::from_bits(bits)).then(|| stats.cpu_percent.to_bits())
            });
    }

    fn latest(&self) -> LiveStats {
        LiveStats {
            memory: self.memory.load(Ordering::Acquire),
            cpu_percent: f64::from_bits(self.cpu_percent.load(Ordering::Acquire)),
        }
    }

    fn peak(&self) -> LiveStats {
        LiveStats {
            memory: self.peak_memory.load(Ordering::Acquire),
            cpu_percent: f64::from_bits(self.peak_cpu_percent.load(Ordering::Acquire)),
        }
    }
}

/// Owned handle to a running monitor thread.
///
/// Dropping the handle stops the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    pid: u32,
    stop: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Starts monitoring `pid` through the real `/proc` at the default interval.
    pub fn start(pid: u32) -> io::Result<Self> {
        Self::start_with(RealFs::new(), "/proc", pid, DEFAULT_POLL_INTERVAL)
    }

    /// Starts monitoring `pid` with an explicit filesystem and interval.
    pub fn start_with<F>(
        fs: F,
        proc_path: impl Into<PathBuf>,
        pid: u32,
        interval: Duration,
    ) -> io::Result<Self>
    where
        F: FileSystem + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SharedStats::default());
        let mut sampler = ProcessTreeSampler::new(fs, proc_path);

        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);
        let thread = thread::Builder::new()
            .name(format!("monitor-{pid}"))
            .spawn(move || {
                let mut last = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    let sample = sampler.sample(pid, now.duration_since(last));
                    last = now;
                    thread_stats.publish(sample);
                    thread::park_timeout(interval);
                }
            })?;

        debug!("Monitoring pid {} every {:?}", pid, interval);
        Ok(Self {
            pid,
            stop,
            stats,
            thread: Some(thread),
        })
    }

    /// The monitored process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Values of the most recent completed tick. Never blocks.
    pub fn latest(&self) -> LiveStats {
        self.stats.latest()
    }

    /// Highest memory and CPU values seen by any tick so far.
    pub fn peak(&self) -> LiveStats {
        self.stats.peak()
    }

    /// Stops the polling thread and waits for it to exit.
    ///
    /// Safe to call repeatedly; once it returns no further tick runs.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Monitor thread for pid {} panicked", self.pid);
            }
            debug!("Stopped monitoring pid {}", self.pid);
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
