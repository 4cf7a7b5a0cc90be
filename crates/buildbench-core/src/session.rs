//! Instrumentation session: tool configuration, memory calibration and the
//! registry of live child processes.
//!
//! One `Session` is built per run and passed by reference to every
//! component. Memory calibration happens at most once per session.

use std::collections::BTreeSet;
use std::io;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, warn};

use crate::timer::calibration::{CALIBRATION_BYTES, MemoryCalibration, TOUCH_MEMORY_ARG};
use crate::timer::{ExitPolicy, Invocation, ProcessTimer, accounting::ACCOUNTING_FORMAT};

/// External tools the pipeline invokes, as argv prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Accounting wrapper placed in front of every timed command.
    pub time_command: Vec<String>,
    /// Version-control client used for checkouts and module discovery.
    pub vcs_command: Vec<String>,
    /// Build-configuration tool; extra options and the source dir are appended.
    pub configure_command: Vec<String>,
    /// Build driver invocation that builds everything.
    pub build_command: Vec<String>,
    /// Build target that stages test binaries without running them.
    pub verify_command: Vec<String>,
    /// Lists declared tests in declaration order.
    pub test_list_command: Vec<String>,
    /// Execution-environment wrapper for tests and benchmarks, relative to the build dir.
    pub env_wrapper: Option<String>,
    /// Script extension to interpreter argv prefix.
    pub interpreters: Vec<(String, Vec<String>)>,
    /// Arguments passed to compiled test binaries to run all cases.
    pub binary_test_args: Vec<String>,
    /// Real C compiler behind the compiler wrapper.
    pub cc: String,
    /// Real C++ compiler behind the compiler wrapper.
    pub cxx: String,
    /// Workload argv prefix for calibration; the byte count is appended.
    pub calibration_workload: Option<Vec<String>>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for ToolConfig {
    fn default() -> Self {
        let calibration_workload = std::env::current_exe()
            .ok()
            .map(|exe| vec![exe.display().to_string(), TOUCH_MEMORY_ARG.to_string()]);

        Self {
            time_command: argv(&["/usr/bin/time", "-f", ACCOUNTING_FORMAT]),
            vcs_command: argv(&["svn"]),
            configure_command: argv(&["cmake", "-DCMAKE_BUILD_TYPE=Release"]),
            build_command: argv(&["make", "all"]),
            verify_command: argv(&["make", "test-bins"]),
            test_list_command: argv(&["ctest", "-N"]),
            env_wrapper: Some("./env-shell.sh".to_string()),
            interpreters: vec![(".py".to_string(), argv(&["python"]))],
            binary_test_args: argv(&["-a"]),
            cc: "gcc".to_string(),
            cxx: "g++".to_string(),
            calibration_workload,
        }
    }
}

impl ToolConfig {
    /// Defaults with the real compilers taken from `CC` and `CXX`.
    pub fn from_env() -> Self {
        let mut tools = Self::default();
        if let Ok(cc) = std::env::var("CC") {
            tools.cc = cc;
        }
        if let Ok(cxx) = std::env::var("CXX") {
            tools.cxx = cxx;
        }
        tools
    }

    /// Interpreter prefix for a script test name, if it has a known extension.
    pub fn interpreter_for(&self, name: &str) -> Option<&[String]> {
        self.interpreters
            .iter()
            .find(|(ext, _)| name.ends_with(ext.as_str()))
            .map(|(_, prefix)| prefix.as_slice())
    }
}

/// Process groups of children that are currently running.
///
/// Children are spawned as leaders of their own process group so that
/// terminating the group also reaches grandchildren (compilers under the
/// build driver, the program under the accounting wrapper).
///
/// [`terminate_all`](Self::terminate_all) also cancels the registry: later
/// registrations are refused and the pipeline stops at its next check.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistry {
    groups: Arc<Mutex<BTreeSet<u32>>>,
    cancelled: Arc<AtomicBool>,
}

impl ChildRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a running group. Returns false once the registry is cancelled.
    pub fn register(&self, pid: u32) -> bool {
        let mut groups = self.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        groups.insert(pid);
        true
    }

    pub fn unregister(&self, pid: u32) {
        self.lock().remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends SIGTERM to one registered process group and forgets it.
    pub fn terminate(&self, pid: u32) {
        if self.lock().remove(&pid) {
            terminate_group(pid);
        }
    }

    /// True after [`terminate_all`](Self::terminate_all) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the registry and sends SIGTERM to every registered process
    /// group.
    ///
    /// Returns the number of groups signalled.
    pub fn terminate_all(&self) -> usize {
        let groups: Vec<u32> = {
            let mut guard = self.lock();
            self.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut *guard).into_iter().collect()
        };
        for pid in &groups {
            terminate_group(*pid);
        }
        groups.len()
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group led by `pid`.
    let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if rc != 0 {
        debug!(
            "kill(-{}) failed: {}",
            pgid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate_group(pid: u32) {
    warn!("cannot terminate process group {} on this platform", pid);
}

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "run cancelled")
}

/// Shared state for one instrumentation run.
#[derive(Debug)]
pub struct Session {
    tools: ToolConfig,
    calibration: OnceLock<MemoryCalibration>,
    children: ChildRegistry,
}

impl Session {
    /// Creates a session that calibrates memory units on first use.
    pub fn new(tools: ToolConfig) -> Self {
        Self {
            tools,
            calibration: OnceLock::new(),
            children: ChildRegistry::default(),
        }
    }

    /// Creates a session with a known memory calibration.
    pub fn with_memory_calibration(tools: ToolConfig, calibration: MemoryCalibration) -> Self {
        let session = Self::new(tools);
        let _ = session.calibration.set(calibration);
        session
    }

    pub fn tools(&self) -> &ToolConfig {
        &self.tools
    }

    /// Registry of running children, shared with signal handlers.
    pub fn children(&self) -> &ChildRegistry {
        &self.children
    }

    /// The memory calibration, measured on first call.
    pub fn memory_calibration(&self) -> MemoryCalibration {
        *self.calibration.get_or_init(|| self.calibrate())
    }

    fn calibrate(&self) -> MemoryCalibration {
        let Some(workload) = &self.tools.calibration_workload else {
            warn!("No calibration workload configured, assuming kilobyte memory readings");
            return MemoryCalibration::default();
        };

        let timer = ProcessTimer::new(self);
        let run = |bytes: u64| {
            let mut args = workload.clone();
            args.push(bytes.to_string());
            timer.run_record(&Invocation::new(args), ExitPolicy::Require)
        };

        match (run(0), run(CALIBRATION_BYTES)) {
            (Ok(baseline), Ok(loaded)) => MemoryCalibration::from_runs(&baseline, &loaded),
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    "Memory calibration failed ({}), assuming kilobyte memory readings",
                    e
                );
                MemoryCalibration::default()
            }
        }
    }

    /// Spawns `command` as a new process group leader and registers it.
    ///
    /// On Linux the child also receives SIGTERM when the spawning thread
    /// dies, so killing the orchestrator outright does not orphan it.
    /// Fails with `ErrorKind::Interrupted` once the session is cancelled.
    pub fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        if self.children.is_cancelled() {
            return Err(cancelled());
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: getpid is async-signal-safe and called before fork.
            let parent = unsafe { libc::getpid() };
            // SAFETY: only async-signal-safe calls run between fork and exec.
            unsafe {
                command.pre_exec(move || {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    // The parent may have died before the prctl took effect.
                    if libc::getppid() != parent {
                        return Err(io::Error::from_raw_os_error(libc::ESRCH));
                    }
                    Ok(())
                });
            }
        }
        let child = command.spawn()?;
        if !self.children.register(child.id()) {
            terminate_group(child.id());
        }
        Ok(child)
    }

    /// Removes an exited child from the registry.
    pub fn release(&self, pid: u32) {
        self.children.unregister(pid);
    }
}
