//! buildbench - measures the build and test cost of one dated revision.
//!
//! Checks out the project as of `--date`, builds it with every compiler
//! call timed, runs the declared tests (or one benchmark) and delivers the
//! resulting metrics to the selected backend.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use buildbench_core::collector::RealFs;
use buildbench_core::pipeline::{PipelineConfig, run_date};
use buildbench_core::timer::calibration::{
    MemoryCalibration, touch_memory, touch_memory_request,
};
use buildbench_core::transport::elastic::DEFAULT_BASENAME;
use buildbench_core::transport::graphite::default_prefix;
use buildbench_core::transport::{
    DeliveryReport, ElasticsearchSink, GraphiteSink, MetricSink, StdoutSink, deliver,
};
use buildbench_core::util::{HostIdentity, parse_date};
use buildbench_core::{MetricMap, RunError, Session, ToolConfig};

/// Exit status after SIGINT/SIGTERM, as a shell reports a signalled job.
const EXIT_INTERRUPTED: i32 = 130;

/// Where metrics are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Print `<date> <name> <value>` lines.
    Stdout,
    /// Graphite plaintext protocol.
    Graphite,
    /// One Elasticsearch document per metric.
    Elastic,
}

/// Build and test cost of one dated revision.
#[derive(Parser)]
#[command(name = "buildbench", about = "Measure build and test cost of one revision", version)]
struct Args {
    /// Revision date (YYYY-MM-DD).
    #[arg(short, long, value_parser = parse_date_arg)]
    date: NaiveDate,

    /// Repository URL of the root project.
    #[arg(long)]
    url: String,

    /// Benchmark command line to run instead of the test suite.
    #[arg(long)]
    benchmark: Option<String>,

    /// Metric prefix (graphite) or index basename (elastic).
    #[arg(long, env = "BUILDBENCH_PREFIX")]
    prefix: Option<String>,

    /// Backend address: `host[:port]` for graphite, base URL for elastic.
    #[arg(
        short = 'a',
        long,
        env = "BUILDBENCH_RESULT_ADDRESS",
        required_if_eq_any([("backend", "graphite"), ("backend", "elastic")])
    )]
    result_address: Option<String>,

    /// Additional options for the configure step.
    #[arg(long = "cmake-opts", allow_hyphen_values = true)]
    cmake_opts: Option<String>,

    /// Metric backend.
    #[arg(long, value_enum, default_value_t = Backend::Stdout)]
    backend: Backend,

    /// Fixed memory over-reporting factor; skips calibration.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    memory_factor: Option<u64>,

    /// Record metrics of tests that exit non-zero.
    #[arg(long)]
    keep_going_tests: bool,

    /// Directory in which the scratch checkout is created.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Debug logging.
    #[arg(long)]
    debug: bool,

    /// Increase logging verbosity (-v for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| e.to_string())
}

/// Initializes the tracing subscriber.
/// Default level is INFO; `--debug` gives DEBUG, `-v` gives TRACE.
fn init_logging(verbose: u8, debug: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose > 0 {
        Level::TRACE
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["buildbench", "buildbench_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn connect_sink(args: &Args, session: &Session) -> Option<Box<dyn MetricSink>> {
    let address = args.result_address.as_deref().unwrap_or_default();
    let sink: Result<Box<dyn MetricSink>, _> = match args.backend {
        Backend::Stdout => return Some(Box::new(StdoutSink::new())),
        Backend::Graphite => {
            let prefix = args.prefix.clone().unwrap_or_else(|| {
                let host = HostIdentity::detect(&RealFs::new(), session);
                default_prefix(&host.hostname, &host.compiler_version)
            });
            info!("Graphite prefix: {}", prefix);
            GraphiteSink::connect(address, prefix).map(|s| Box::new(s) as Box<dyn MetricSink>)
        }
        Backend::Elastic => {
            let host = HostIdentity::detect(&RealFs::new(), session);
            let basename = args.prefix.as_deref().unwrap_or(DEFAULT_BASENAME);
            ElasticsearchSink::connect(address, basename, host.hostname, host.compiler_version)
                .map(|s| Box::new(s) as Box<dyn MetricSink>)
        }
    };
    match sink {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!("Cannot reach {:?} backend at {}: {}", args.backend, address, e);
            None
        }
    }
}

fn publish(args: &Args, session: &Session, metrics: &MetricMap) -> DeliveryReport {
    match connect_sink(args, session) {
        Some(mut sink) => deliver(sink.as_mut(), metrics, args.date),
        None => DeliveryReport {
            sent: 0,
            failed: metrics.len(),
        },
    }
}

fn main() {
    if let Some(bytes) = touch_memory_request(std::env::args()) {
        touch_memory(bytes);
        return;
    }

    let args = Args::parse();
    init_logging(args.verbose, args.debug, args.quiet);

    info!("buildbench {} starting", env!("CARGO_PKG_VERSION"));
    info!("Config: date={}, url={}, backend={:?}", args.date, args.url, args.backend);

    let tools = ToolConfig::from_env();
    debug!("Compilers: CC={} CXX={}", tools.cc, tools.cxx);
    let session = match args.memory_factor {
        Some(factor) => {
            Session::with_memory_calibration(tools, MemoryCalibration::with_divisor(factor))
        }
        None => Session::new(tools),
    };

    // SIGINT, SIGTERM and SIGHUP cancel the session; the running stage then
    // fails and the scratch directory is removed on the way out.
    let children = session.children().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let signalled = children.terminate_all();
        warn!("Interrupted, terminated {} child process groups", signalled);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let calibration = session.memory_calibration();
    debug!("Memory calibration: {:?}", calibration);

    let config = PipelineConfig {
        url: args.url.clone(),
        date: args.date,
        benchmark: args.benchmark.clone(),
        configure_options: args.cmake_opts.clone(),
        record_failed_tests: args.keep_going_tests,
        work_dir: args.work_dir.clone(),
    };

    let metrics = match run_date(&session, &config) {
        Ok(_) | Err(RunError::Interrupted) if session.children().is_cancelled() => {
            error!("Run for {} interrupted, nothing delivered", args.date);
            std::process::exit(EXIT_INTERRUPTED);
        }
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Run for {} failed: {}", args.date, e);
            eprintln!("buildbench: {}", e);
            std::process::exit(1);
        }
    };

    let report = publish(&args, &session, &metrics);
    if report.failed > 0 {
        warn!("{} of {} metrics were not delivered", report.failed, metrics.len());
    }
    info!("Done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_minimal_args() {
        let args = Args::try_parse_from([
            "buildbench",
            "--date",
            "2016-01-02",
            "--url",
            "http://x/meta",
        ])
        .unwrap();
        assert_eq!(args.date, NaiveDate::from_ymd_opt(2016, 1, 2).unwrap());
        assert_eq!(args.backend, Backend::Stdout);
        assert!(args.benchmark.is_none());
        assert!(!args.keep_going_tests);
    }

    #[test]
    fn test_parse_full_args() {
        let args = Args::try_parse_from([
            "buildbench",
            "-d",
            "2016-01-02",
            "--url",
            "http://x/meta",
            "--backend",
            "graphite",
            "-a",
            "graphite.local:2004",
            "--prefix",
            "nightly",
            "--cmake-opts",
            "-DUSE_ROOT=OFF",
            "--memory-factor",
            "4",
            "--debug",
        ])
        .unwrap();
        assert_eq!(args.backend, Backend::Graphite);
        assert_eq!(args.result_address.as_deref(), Some("graphite.local:2004"));
        assert_eq!(args.cmake_opts.as_deref(), Some("-DUSE_ROOT=OFF"));
        assert_eq!(args.memory_factor, Some(4));
        assert!(args.debug);
    }

    #[test]
    fn test_rejects_bad_date_and_zero_factor() {
        assert!(
            Args::try_parse_from(["buildbench", "--date", "01/02/2016", "--url", "u"]).is_err()
        );
        assert!(
            Args::try_parse_from([
                "buildbench",
                "--date",
                "2016-01-02",
                "--url",
                "u",
                "--memory-factor",
                "0"
            ])
            .is_err()
        );
    }
}
