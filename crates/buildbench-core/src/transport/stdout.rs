//! Plain-text sink, one `<date> <name> <value>` line per metric.

use std::io::{self, Write};

use chrono::NaiveDate;

use super::MetricSink;
use crate::error::TransportError;
use crate::metrics::MetricValue;

/// Writes metric lines to any writer; standard output by default.
#[derive(Debug)]
pub struct StdoutSink<W: Write = io::Stdout> {
    out: W,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> StdoutSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricSink for StdoutSink<W> {
    fn send(
        &mut self,
        name: &str,
        value: MetricValue,
        timestamp: NaiveDate,
    ) -> Result<(), TransportError> {
        writeln!(self.out, "{} {} {}", timestamp.format("%Y-%m-%d"), name, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricMap;
    use crate::transport::deliver;

    #[test]
    fn test_stdout_lines() {
        let mut metrics = MetricMap::new();
        metrics.insert("cmake.cpu_walltime".to_string(), MetricValue::Float(12.5));
        metrics.insert("cmake.memory_max".to_string(), MetricValue::Int(4096));

        let mut sink = StdoutSink::with_writer(Vec::new());
        let date = NaiveDate::from_ymd_opt(2016, 1, 2).unwrap();
        deliver(&mut sink, &metrics, date);

        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "2016-01-02 cmake.cpu_walltime 12.5\n2016-01-02 cmake.memory_max 4096\n"
        );
    }
}
