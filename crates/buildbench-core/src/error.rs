//! Error taxonomy for the instrumentation pipeline.
//!
//! Errors local to one sample or one test are absorbed by their callers and
//! logged. `BuildError` and `RunError` carry the failures that abort a whole
//! stage and therefore the whole run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A wrapped process exited unsuccessfully (or could not be run at all).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process ran and exited with a non-zero status or was signalled.
    #[error("`{command}` exited with {status}")]
    Exit {
        command: String,
        /// Exit code, or `"signal"` when the process was killed.
        status: String,
        /// Captured stdout followed by stderr.
        output: String,
    },
    /// The process could not be spawned or waited on.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// The process produced no usable accounting record.
    #[error("`{command}`: {source}")]
    Accounting {
        command: String,
        #[source]
        source: AccountingParseError,
    },
}

impl ProcessError {
    /// Captured combined output, when the process got far enough to produce any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ProcessError::Exit { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// The accounting sentinel line was absent or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingParseError {
    #[error("no `time:` accounting line in output")]
    Missing,
    #[error("accounting line has {found} fields, expected 6: {line:?}")]
    FieldCount { line: String, found: usize },
    #[error("invalid {field} value {value:?} in accounting line")]
    InvalidField { field: &'static str, value: String },
}

/// A declared test could not be turned into an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestResolutionError {
    #[error("test name {0:?} is not of the form <module>::<test>")]
    MalformedName(String),
    #[error("cannot find script {name} under {dir}")]
    ScriptNotFound { name: String, dir: PathBuf },
    #[error("cannot find test binary {0}")]
    BinaryNotFound(PathBuf),
    #[error("no interpreter configured for {0}")]
    NoInterpreter(String),
}

/// Delivery of a single metric failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Source checkout failed.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Stage-fatal failures of the build instrumentor.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("configure stage failed: {0}")]
    Configure(#[source] ProcessError),
    #[error("compile stage failed: {0}")]
    Compile(#[source] ProcessError),
    #[error("compile stage lost the build driver output: {0}")]
    DriverStream(#[source] io::Error),
    #[error("verify stage failed: {0}")]
    Verify(#[source] ProcessError),
    #[error("I/O error preparing build directory: {0}")]
    Io(#[from] io::Error),
}

/// Failures that abort a whole pipeline run; no metrics are delivered.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("checkout failed: {0}")]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("test listing failed: {0}")]
    TestListing(#[source] ProcessError),
    #[error("benchmark failed: {0}")]
    Benchmark(#[source] ProcessError),
    /// The session was cancelled while a stage was running.
    #[error("run interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
