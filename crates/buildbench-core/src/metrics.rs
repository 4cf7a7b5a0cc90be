//! The flat metric mapping handed to transports.
//!
//! Names are dotted paths that downstream dashboards depend on:
//! `cmake.<field>`, `make.<module>.<field>`, `test.<module>_<test>.<field>`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::timer::ResourceSample;

/// A scalar metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Float(v) => v,
            MetricValue::Int(v) => v as f64,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

/// Metric name to value, ordered by name.
pub type MetricMap = BTreeMap<String, MetricValue>;

/// Replaces `::`, `.` and `/` in a test or benchmark name with `_`.
///
/// `suite::check.py` becomes `suite_check_py`.
pub fn sanitize_name(name: &str) -> String {
    name.replace("::", "_").replace(['.', '/'], "_")
}

/// Inserts every field of `sample` under `<prefix>.<field>`.
pub fn insert_sample(metrics: &mut MetricMap, prefix: &str, sample: &ResourceSample) {
    for (field, value) in sample.fields() {
        metrics.insert(format!("{prefix}.{field}"), value);
    }
}
