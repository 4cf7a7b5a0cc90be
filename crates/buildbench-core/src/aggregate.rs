//! Reduction of distribution series into `_avg` / `_max` scalars.
//!
//! Reductions are pure and independent of sample order. Float series are
//! summed in sorted order so that permuting the input cannot change the
//! rounding of the sum.

use crate::metrics::{MetricMap, MetricValue};

/// Integer mean and maximum of one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Sum divided by count, truncated. Zero for an empty series.
    pub avg: i64,
    /// Largest sample, truncated. Zero for an empty series.
    pub max: i64,
}

impl Summary {
    /// Inserts `<prefix>.<metric>_avg` and `<prefix>.<metric>_max`.
    pub fn insert_into(&self, metrics: &mut MetricMap, prefix: &str, metric: &str) {
        metrics.insert(format!("{prefix}.{metric}_avg"), MetricValue::Int(self.avg));
        metrics.insert(format!("{prefix}.{metric}_max"), MetricValue::Int(self.max));
    }
}

/// Summarises a series of floating-point samples (CPU percent).
pub fn summarize_f64(series: &[f64]) -> Summary {
    if series.is_empty() {
        return Summary::default();
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(f64::total_cmp);

    let sum: f64 = sorted.iter().sum();
    let max = sorted[sorted.len() - 1];
    Summary {
        avg: (sum / sorted.len() as f64).trunc() as i64,
        max: max.trunc() as i64,
    }
}

/// Summarises a series of integer samples (memory bytes).
pub fn summarize_u64(series: &[u64]) -> Summary {
    let Some(max) = series.iter().copied().max() else {
        return Summary::default();
    };
    let sum: u128 = series.iter().map(|v| u128::from(*v)).sum();
    let avg = sum / series.len() as u128;
    Summary {
        avg: i64::try_from(avg).unwrap_or(i64::MAX),
        max: i64::try_from(max).unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_example_series() {
        let expected = Summary { avg: 200, max: 300 };
        assert_eq!(summarize_u64(&[100, 300, 200]), expected);
        assert_eq!(summarize_u64(&[300, 100, 200]), expected);
        assert_eq!(summarize_f64(&[100.0, 300.0, 200.0]), expected);
        assert_eq!(summarize_f64(&[300.0, 100.0, 200.0]), expected);
    }

    #[test]
    fn test_summarize_empty_is_zero() {
        assert_eq!(summarize_u64(&[]), Summary { avg: 0, max: 0 });
        assert_eq!(summarize_f64(&[]), Summary { avg: 0, max: 0 });
    }

    #[test]
    fn test_summarize_truncates_mean() {
        assert_eq!(summarize_u64(&[1, 2]), Summary { avg: 1, max: 2 });
        assert_eq!(summarize_f64(&[50.0, 75.5]), Summary { avg: 62, max: 75 });
    }

    #[test]
    fn test_summarize_f64_order_independent() {
        let series = [0.1, 0.2, 0.3, 1e16, -1e16, 7.0, 99.9];
        let base = summarize_f64(&series);

        let mut permuted = series;
        permuted.reverse();
        assert_eq!(summarize_f64(&permuted), base);
        permuted.swap(0, 3);
        permuted.swap(2, 5);
        assert_eq!(summarize_f64(&permuted), base);
    }

    #[test]
    fn test_summary_insert_into() {
        let mut metrics = MetricMap::new();
        Summary { avg: 5, max: 9 }.insert_into(&mut metrics, "make.foo", "memory");

        assert_eq!(metrics["make.foo.memory_avg"], MetricValue::Int(5));
        assert_eq!(metrics["make.foo.memory_max"], MetricValue::Int(9));
    }
}
