//! Per-module accumulation of attributed compile/link samples.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use super::attribution::ModuleAttributor;
use super::classify::BuildLine;
use crate::aggregate::{summarize_f64, summarize_u64};
use crate::metrics::{MetricMap, MetricValue};
use crate::timer::ResourceSample;
use crate::timer::accounting::parse_accounting_line;
use crate::timer::calibration::MemoryCalibration;

/// Running totals and distributions for one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleSeries {
    pub cpu_walltime: f64,
    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_percent: Vec<f64>,
    pub memory: Vec<u64>,
}

impl ModuleSeries {
    pub fn record(&mut self, sample: &ResourceSample) {
        self.cpu_walltime += sample.cpu_walltime;
        self.cpu_user += sample.cpu_user;
        self.cpu_system += sample.cpu_system;
        self.cpu_percent.push(sample.cpu_percent);
        self.memory.push(sample.memory_max);
    }

    /// Reduces the series into `make.<module>.*` metrics.
    pub fn into_metrics(self, module: &str, metrics: &mut MetricMap) {
        let prefix = format!("make.{module}");
        metrics.insert(
            format!("{prefix}.cpu_walltime"),
            MetricValue::Float(self.cpu_walltime),
        );
        metrics.insert(format!("{prefix}.cpu_user"), MetricValue::Float(self.cpu_user));
        metrics.insert(
            format!("{prefix}.cpu_system"),
            MetricValue::Float(self.cpu_system),
        );
        summarize_f64(&self.cpu_percent).insert_into(metrics, &prefix, "cpu_percent");
        summarize_u64(&self.memory).insert_into(metrics, &prefix, "memory");
    }
}

/// Consumes the build driver's output line by line.
///
/// Lines must be fed in emission order: an accounting line is attributed
/// using the progress line seen immediately before it.
#[derive(Debug)]
pub struct BuildOutputProcessor {
    attributor: ModuleAttributor,
    series: BTreeMap<String, ModuleSeries>,
    calibration: MemoryCalibration,
    attributed: usize,
    dropped: usize,
}

impl BuildOutputProcessor {
    /// Starts with an empty series for every module.
    pub fn new(modules: &BTreeSet<String>, calibration: MemoryCalibration) -> Self {
        Self {
            attributor: ModuleAttributor::new(modules),
            series: modules
                .iter()
                .map(|m| (m.clone(), ModuleSeries::default()))
                .collect(),
            calibration,
            attributed: 0,
            dropped: 0,
        }
    }

    pub fn process_line(&mut self, line: &str) {
        match BuildLine::classify(line) {
            BuildLine::Blank => {}
            BuildLine::Progress(text) => self.attributor.observe_progress(text),
            BuildLine::Accounting(text) => self.process_accounting(text),
        }
    }

    fn process_accounting(&mut self, text: &str) {
        let record = match parse_accounting_line(text) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping compile sample: {}", e);
                self.dropped += 1;
                return;
            }
        };

        let Some(module) = self.attributor.attribute() else {
            warn!("Dropping compile sample, no module attributed yet: {:?}", text);
            self.dropped += 1;
            return;
        };

        let sample = ResourceSample::from_record(&record, self.calibration);
        trace!("{} <- {:?}", module, sample);
        self.series
            .entry(module.to_string())
            .or_default()
            .record(&sample);
        self.attributed += 1;
    }

    /// Number of samples accumulated so far.
    pub fn attributed(&self) -> usize {
        self.attributed
    }

    /// Number of accounting lines dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn series(&self) -> &BTreeMap<String, ModuleSeries> {
        &self.series
    }

    /// Reduces every module's series into the metric map.
    pub fn finish(self, metrics: &mut MetricMap) {
        debug!(
            "Compile samples: {} attributed, {} dropped",
            self.attributed, self.dropped
        );
        for (module, series) in self.series {
            series.into_metrics(&module, metrics);
        }
    }
}
