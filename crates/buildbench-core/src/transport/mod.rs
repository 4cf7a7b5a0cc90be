//! Metric delivery.
//!
//! A [`MetricSink`] sends one metric at a time. [`deliver`] pushes a whole
//! [`MetricMap`] through a sink, logging and counting failures without
//! stopping.

pub mod elastic;
pub mod graphite;
pub mod stdout;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{info, warn};

use crate::error::TransportError;
use crate::metrics::{MetricMap, MetricValue};
pub use elastic::ElasticsearchSink;
pub use graphite::GraphiteSink;
pub use stdout::StdoutSink;

/// Destination for individual metrics.
pub trait MetricSink {
    fn send(
        &mut self,
        name: &str,
        value: MetricValue,
        timestamp: NaiveDate,
    ) -> Result<(), TransportError>;
}

/// Outcome of one [`deliver`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends every metric, in name order.
pub fn deliver<S: MetricSink + ?Sized>(
    sink: &mut S,
    metrics: &MetricMap,
    timestamp: NaiveDate,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for (name, value) in metrics {
        match sink.send(name, *value, timestamp) {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!("Cannot deliver {}: {}", name, e);
                report.failed += 1;
            }
        }
    }
    info!(
        "Delivered {} metrics, {} failed",
        report.sent, report.failed
    );
    report
}

/// Midnight UTC of the run date.
pub(crate) fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}
