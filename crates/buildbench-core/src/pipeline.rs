//! One complete measurement for one date: checkout, build, tests (or a
//! single benchmark).
//!
//! All work happens in a scratch directory that is removed when the run
//! ends, successfully or not. A stage-fatal error returns no metrics at
//! all, so nothing partial is ever delivered for the date.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::build::BuildInstrumentor;
use crate::checkout::checkout;
use crate::error::RunError;
use crate::metrics::{MetricMap, MetricValue, insert_sample, sanitize_name};
use crate::monitor::MonitorHandle;
use crate::session::Session;
use crate::testrun::{TestRunConfig, TestRunner};
use crate::timer::{ExitPolicy, Invocation, ProcessTimer};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Repository URL of the root project.
    pub url: String,
    pub date: NaiveDate,
    /// Command line run from the build directory instead of the test suite.
    pub benchmark: Option<String>,
    /// Extra options for the configure step, whitespace separated.
    pub configure_options: Option<String>,
    pub record_failed_tests: bool,
    /// Parent of the scratch directory.
    pub work_dir: PathBuf,
}

/// Runs the whole pipeline and returns the metrics for delivery.
///
/// Returns [`RunError::Interrupted`] when the session is cancelled, in
/// place of whatever error the killed stage reported.
pub fn run_date(session: &Session, config: &PipelineConfig) -> Result<MetricMap, RunError> {
    let scratch = tempfile::Builder::new()
        .prefix("buildbench-")
        .tempdir_in(&config.work_dir)?;
    info!(
        "Measuring {} at {} in {}",
        config.url,
        config.date,
        scratch.path().display()
    );

    let result = run_stages(session, config, scratch.path());
    if session.children().is_cancelled() {
        warn!("Run for {} interrupted", config.date);
        return Err(RunError::Interrupted);
    }
    result
}

fn run_stages(
    session: &Session,
    config: &PipelineConfig,
    scratch: &Path,
) -> Result<MetricMap, RunError> {
    let src_dir = scratch.join("src");
    let build_dir = scratch.join("build");

    let externals = checkout(session, &config.url, &src_dir, config.date)?;
    let modules = externals.into_iter().map(|e| e.name).collect();

    let mut metrics = BuildInstrumentor::new(session, modules).run(
        &src_dir,
        &build_dir,
        config.configure_options.as_deref(),
    )?;

    match &config.benchmark {
        Some(benchmark) => metrics.extend(run_benchmark(session, &build_dir, benchmark)?),
        None => {
            let runner = TestRunner::new(
                session,
                TestRunConfig {
                    record_failed_tests: config.record_failed_tests,
                },
            );
            metrics.extend(runner.run(&build_dir)?);
        }
    }

    info!("Collected {} metrics for {}", metrics.len(), config.date);
    Ok(metrics)
}

/// Metric-safe name of a benchmark command line.
fn benchmark_key(benchmark: &str) -> String {
    let words: Vec<&str> = benchmark.split_whitespace().collect();
    sanitize_name(&words.join("_"))
}

/// Times one benchmark command line while sampling its process tree.
///
/// Metrics are `benchmark.<name>.<field>` plus the live peaks
/// `benchmark.<name>.live_memory_max` and `.live_cpu_percent_max`.
pub fn run_benchmark(
    session: &Session,
    build_dir: &Path,
    benchmark: &str,
) -> Result<MetricMap, RunError> {
    let mut invocation =
        Invocation::new(benchmark.split_whitespace()).current_dir(build_dir);
    if let Some(wrapper) = &session.tools().env_wrapper {
        invocation = invocation.launcher([wrapper.clone()]);
    }

    info!("Running benchmark {}", benchmark);
    let child = ProcessTimer::new(session)
        .spawn(&invocation, ExitPolicy::Require)
        .map_err(RunError::Benchmark)?;
    let monitor = match MonitorHandle::start(child.pid()) {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            warn!("Live monitoring unavailable: {}", e);
            None
        }
    };

    let result = child.wait();
    let peak = monitor.map(|mut monitor| {
        monitor.stop();
        monitor.peak()
    });
    let sample = result.map_err(RunError::Benchmark)?;

    let prefix = format!("benchmark.{}", benchmark_key(benchmark));
    let mut metrics = MetricMap::new();
    insert_sample(&mut metrics, &prefix, &sample);
    if let Some(peak) = peak {
        metrics.insert(format!("{prefix}.live_memory_max"), peak.memory.into());
        metrics.insert(
            format!("{prefix}.live_cpu_percent_max"),
            MetricValue::Float(peak.cpu_percent),
        );
    }
    Ok(metrics)
}
