//! buildbench-range - back-fills a time series by running `buildbench` once
//! per date in a range.
//!
//! Every argument not understood here is forwarded to `buildbench`, after
//! `--date <YYYY-MM-DD>`. A failed date is logged and the range continues.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::NaiveDate;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use buildbench_core::util::{date_range, parse_date};

/// Run buildbench for every date in a range.
#[derive(Parser)]
#[command(name = "buildbench-range", about = "Run buildbench for a range of dates", version)]
struct Args {
    /// First date (YYYY-MM-DD), inclusive.
    #[arg(long, value_parser = parse_date_arg)]
    start: NaiveDate,

    /// Last date (YYYY-MM-DD), exclusive.
    #[arg(long, value_parser = parse_date_arg)]
    end: NaiveDate,

    /// Days between runs.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    skip: u64,

    /// Path to the buildbench binary. Defaults to the one next to this binary.
    #[arg(long)]
    buildbench: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Arguments passed through to buildbench.
    #[arg(last = true, allow_hyphen_values = true)]
    forward: Vec<String>,
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| e.to_string())
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["buildbench_range", "buildbench_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// `buildbench` installed next to the running executable, else from `PATH`.
fn default_buildbench() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("buildbench")))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("buildbench"))
}

/// Argv for one date.
fn date_args(date: NaiveDate, forward: &[String]) -> Vec<String> {
    let mut args = vec!["--date".to_string(), date.format("%Y-%m-%d").to_string()];
    args.extend(forward.iter().cloned());
    args
}

/// Sends SIGTERM to the running buildbench, if any.
fn forward_terminate(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if pid == 0 {
        return;
    }
    // SAFETY: kill(2) has no memory-safety preconditions.
    #[cfg(unix)]
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let dates = match date_range(args.start, args.end, args.skip) {
        Ok(dates) => dates,
        Err(e) => {
            error!("Invalid range: {}", e);
            eprintln!("buildbench-range: {}", e);
            std::process::exit(2);
        }
    };
    let buildbench = args.buildbench.clone().unwrap_or_else(default_buildbench);
    info!(
        "Running {} for {} dates from {} to {}",
        buildbench.display(),
        dates.len(),
        args.start,
        args.end
    );

    // Ctrl-C in a terminal reaches the child through the shared process
    // group; a SIGTERM aimed at this process alone is passed on to it.
    let running = Arc::new(AtomicBool::new(true));
    let current = Arc::new(AtomicU32::new(0));
    let (r, c) = (running.clone(), current.clone());
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt, stopping after the current date");
        r.store(false, Ordering::SeqCst);
        forward_terminate(c.load(Ordering::SeqCst));
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let mut failed = 0;
    for date in &dates {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let argv = date_args(*date, &args.forward);
        debug!("Running {} {:?}", buildbench.display(), argv);
        let status = Command::new(&buildbench).args(&argv).spawn().and_then(|mut child| {
            current.store(child.id(), Ordering::SeqCst);
            let status = child.wait();
            current.store(0, Ordering::SeqCst);
            status
        });
        match status {
            Ok(status) if status.success() => info!("{}: done", date),
            Ok(status) => {
                warn!("{}: buildbench exited with {}", date, status);
                failed += 1;
            }
            Err(e) => {
                error!("{}: cannot run {}: {}", date, buildbench.display(), e);
                failed += 1;
            }
        }
    }

    info!("Range finished: {} dates, {} failed", dates.len(), failed);
}
