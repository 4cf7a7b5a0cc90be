//! Process timer: runs one child under the accounting wrapper and turns the
//! wrapper's record into a [`ResourceSample`].
//!
//! Accounting comes from the operating system at process exit (GNU time
//! uses `wait4`), so the figures are exact rather than sampled.

pub mod accounting;
pub mod calibration;

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{AccountingParseError, ProcessError};
use crate::metrics::MetricValue;
use crate::session::Session;
use accounting::{AccountingRecord, find_accounting_line, parse_accounting_line};
use calibration::MemoryCalibration;

/// Measurements of one completed process execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// User CPU seconds.
    pub cpu_user: f64,
    /// System CPU seconds.
    pub cpu_system: f64,
    /// Wall-clock seconds.
    pub cpu_walltime: f64,
    /// CPU utilisation; above 100 for multi-threaded work.
    pub cpu_percent: f64,
    /// Peak resident memory in bytes.
    pub memory_max: u64,
}

impl ResourceSample {
    /// Normalises a raw accounting record.
    pub fn from_record(record: &AccountingRecord, calibration: MemoryCalibration) -> Self {
        Self {
            cpu_user: record.cpu_user,
            cpu_system: record.cpu_system,
            cpu_walltime: record.cpu_walltime,
            cpu_percent: record.cpu_percent,
            memory_max: calibration.to_bytes(record.memory_max),
        }
    }

    /// Field names and values, in metric naming order.
    pub fn fields(&self) -> [(&'static str, MetricValue); 5] {
        [
            ("cpu_user", self.cpu_user.into()),
            ("cpu_system", self.cpu_system.into()),
            ("cpu_walltime", self.cpu_walltime.into()),
            ("cpu_percent", self.cpu_percent.into()),
            ("memory_max", self.memory_max.into()),
        ]
    }
}

/// Whether a non-zero exit of the timed process is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Non-zero exit is reported as [`ProcessError::Exit`].
    Require,
    /// Non-zero exit is logged; the accounting record is still returned.
    Tolerate,
}

/// A command line to run under the timer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    launcher: Vec<String>,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Argv prefix placed in front of the accounting wrapper itself, such as
    /// an environment setup script.
    pub fn launcher<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The wrapped command line as the user would type it.
    pub fn display(&self) -> String {
        self.args.join(" ")
    }
}

fn build_command(invocation: &Invocation, wrapper: &[String]) -> io::Result<Command> {
    let mut argv = invocation
        .launcher
        .iter()
        .chain(wrapper.iter())
        .chain(invocation.args.iter());
    let program = argv
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

    let mut command = Command::new(program);
    command
        .args(argv)
        .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }
    Ok(command)
}

/// Runs an invocation without accounting and returns its stdout.
///
/// Used for the untimed steps around the measurements (test listing,
/// staging targets, checkouts). A non-zero exit is a [`ProcessError::Exit`].
pub fn run_captured(session: &Session, invocation: &Invocation) -> Result<String, ProcessError> {
    let command_line = invocation.display();
    let spawn_error = |source| ProcessError::Spawn {
        command: command_line.clone(),
        source,
    };

    let mut command = build_command(invocation, &[]).map_err(spawn_error)?;
    let child = session.spawn(&mut command).map_err(spawn_error)?;
    let pid = child.id();
    let result = child.wait_with_output();
    session.release(pid);
    let output = result.map_err(spawn_error)?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessError::Exit {
            command: command_line,
            status: exit_status(&output.status),
            output: format!("{stdout}{stderr}"),
        });
    }
    Ok(stdout)
}

/// Exit code as text, or `"signal"` when the process was killed.
pub(crate) fn exit_status(status: &std::process::ExitStatus) -> String {
    status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Runs invocations under the session's accounting wrapper.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTimer<'a> {
    session: &'a Session,
}

impl<'a> ProcessTimer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn command(&self, invocation: &Invocation) -> io::Result<Command> {
        build_command(invocation, &self.session.tools().time_command)
    }

    /// Starts the invocation and returns a handle to wait on.
    pub fn spawn(
        &self,
        invocation: &Invocation,
        policy: ExitPolicy,
    ) -> Result<TimedChild<'a>, ProcessError> {
        let command_line = invocation.display();
        let spawn_error = |source| ProcessError::Spawn {
            command: command_line.clone(),
            source,
        };

        let mut command = self.command(invocation).map_err(spawn_error)?;
        let child = self.session.spawn(&mut command).map_err(spawn_error)?;
        debug!("Started `{}` (pid {})", command_line, child.id());

        Ok(TimedChild {
            session: self.session,
            pid: child.id(),
            child: Some(child),
            command: command_line,
            policy,
        })
    }

    /// Runs the invocation to completion and returns its raw record.
    pub fn run_record(
        &self,
        invocation: &Invocation,
        policy: ExitPolicy,
    ) -> Result<AccountingRecord, ProcessError> {
        self.spawn(invocation, policy)?.wait_record()
    }

    /// Runs the invocation to completion and returns its normalised sample.
    pub fn run(
        &self,
        invocation: &Invocation,
        policy: ExitPolicy,
    ) -> Result<ResourceSample, ProcessError> {
        self.spawn(invocation, policy)?.wait()
    }
}

/// A running timed process.
///
/// Dropping it before `wait` kills the process group.
#[derive(Debug)]
pub struct TimedChild<'a> {
    session: &'a Session,
    pid: u32,
    child: Option<Child>,
    command: String,
    policy: ExitPolicy,
}

impl TimedChild<'_> {
    /// Pid of the accounting wrapper; the timed program is its descendant.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for exit and parses the accounting record.
    pub fn wait_record(mut self) -> Result<AccountingRecord, ProcessError> {
        let Some(child) = self.child.take() else {
            return Err(ProcessError::Accounting {
                command: self.command.clone(),
                source: AccountingParseError::Missing,
            });
        };

        let result = child.wait_with_output();
        self.session.release(self.pid);
        let output = result.map_err(|source| ProcessError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        trace!("`{}` stdout:\n{}", self.command, stdout);
        trace!("`{}` stderr:\n{}", self.command, stderr);

        if !output.status.success() {
            let status = exit_status(&output.status);
            match self.policy {
                ExitPolicy::Require => {
                    return Err(ProcessError::Exit {
                        command: self.command.clone(),
                        status,
                        output: format!("{stdout}{stderr}"),
                    });
                }
                ExitPolicy::Tolerate => {
                    warn!("`{}` exited with {}, keeping its accounting", self.command, status);
                }
            }
        }

        let line = find_accounting_line(&stderr)
            .or_else(|| find_accounting_line(&stdout))
            .ok_or(AccountingParseError::Missing);
        line.and_then(parse_accounting_line)
            .map_err(|source| ProcessError::Accounting {
                command: self.command.clone(),
                source,
            })
    }

    /// Waits for exit and returns the normalised sample.
    pub fn wait(self) -> Result<ResourceSample, ProcessError> {
        let session = self.session;
        let record = self.wait_record()?;
        Ok(ResourceSample::from_record(
            &record,
            session.memory_calibration(),
        ))
    }
}

impl Drop for TimedChild<'_> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            self.session.children().terminate(self.pid);
            let _ = child.kill();
            let _ = child.wait();
            self.session.release(self.pid);
        }
    }
}
