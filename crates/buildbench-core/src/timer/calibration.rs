//! Memory unit calibration for the accounting wrapper.
//!
//! GNU time reports peak memory in kilobytes, but some builds of it report
//! a multiple of the true figure (4x has been observed for threaded
//! programs). The factor is measured once per session by running a workload
//! that touches a known number of bytes, once empty and once loaded, and
//! comparing the reported difference against the known size.

use std::hint::black_box;

use tracing::{debug, info, warn};

use super::accounting::AccountingRecord;

/// Size of the buffer the calibration workload touches.
pub const CALIBRATION_BYTES: u64 = 10_000_000;

/// Hidden argument under which binaries run [`touch_memory`].
pub const TOUCH_MEMORY_ARG: &str = "__touch-memory";

const PAGE: usize = 4096;

/// Converts native accounting memory units into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCalibration {
    /// Bytes per native unit (1024 for kilobytes).
    pub unit_bytes: u64,
    /// Integer over-reporting multiple to divide out.
    pub divisor: u64,
}

impl Default for MemoryCalibration {
    fn default() -> Self {
        Self {
            unit_bytes: 1024,
            divisor: 1,
        }
    }
}

impl MemoryCalibration {
    pub fn with_divisor(divisor: u64) -> Self {
        Self {
            divisor: divisor.max(1),
            ..Self::default()
        }
    }

    /// Derives the calibration from an empty and a loaded workload run.
    pub fn from_runs(baseline: &AccountingRecord, loaded: &AccountingRecord) -> Self {
        let unit = Self::default().unit_bytes;
        let divisor = calibration_factor(
            baseline.memory_max.saturating_mul(unit),
            loaded.memory_max.saturating_mul(unit),
            CALIBRATION_BYTES,
        );
        if divisor > 1 {
            info!(
                "Accounting tool over-reports memory {}x, dividing readings by {}",
                divisor, divisor
            );
        } else {
            debug!("Accounting tool memory readings need no correction");
        }
        Self::with_divisor(divisor)
    }

    /// Normalises a native memory reading to bytes.
    pub fn to_bytes(&self, native: u64) -> u64 {
        native.saturating_mul(self.unit_bytes) / self.divisor
    }
}

/// Integer factor by which reported memory exceeds the known footprint.
///
/// Always at least 1; an unusable measurement (no growth) yields 1.
pub fn calibration_factor(baseline_bytes: u64, loaded_bytes: u64, expected_bytes: u64) -> u64 {
    let grown = loaded_bytes.saturating_sub(baseline_bytes);
    if expected_bytes == 0 || grown == 0 {
        warn!(
            "Calibration workload showed no memory growth ({} -> {} bytes)",
            baseline_bytes, loaded_bytes
        );
        return 1;
    }
    let ratio = grown as f64 / expected_bytes as f64;
    (ratio.round() as u64).max(1)
}

/// Allocates `bytes` and writes to every page so it becomes resident.
pub fn touch_memory(bytes: usize) {
    let mut buffer = vec![0u8; bytes];
    for idx in (0..buffer.len()).step_by(PAGE) {
        buffer[idx] = 1;
    }
    black_box(&buffer);
}

/// Byte count when `args` (including the program name) is a calibration
/// workload request: `<program> __touch-memory <bytes>`.
pub fn touch_memory_request<I>(args: I) -> Option<usize>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    if args.next()? != TOUCH_MEMORY_ARG {
        return None;
    }
    Some(args.next().and_then(|bytes| bytes.parse().ok()).unwrap_or(0))
}
