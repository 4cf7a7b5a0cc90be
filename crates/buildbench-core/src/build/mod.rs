//! Build instrumentor.
//!
//! Drives a multi-module build through three sequential stages:
//!
//! ```text
//! CONFIGURE ──► COMPILE ──► VERIFY ──► DONE
//!  (timed)     (every compiler      (stage test
//!               call timed)          binaries)
//! ```
//!
//! During COMPILE the `CC`/`CXX` variables point at generated wrapper
//! scripts, so each compiler invocation prints an accounting line into the
//! driver's combined output right after the driver's progress line for that
//! artifact. The output is consumed by a [`BuildOutputProcessor`].

pub mod attribution;
pub mod classify;
pub mod series;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, trace, warn};

use crate::error::{BuildError, ProcessError};
use crate::metrics::{MetricMap, MetricValue};
use crate::session::Session;
use crate::timer::{ExitPolicy, Invocation, ProcessTimer, exit_status, run_captured};
pub use series::{BuildOutputProcessor, ModuleSeries};

/// Lines of driver output kept for the error message of a failed COMPILE.
const OUTPUT_TAIL_LINES: usize = 50;

/// Stages of one instrumented build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Configure,
    Compile,
    Verify,
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Configure => "CONFIGURE",
            BuildStage::Compile => "COMPILE",
            BuildStage::Verify => "VERIFY",
            BuildStage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Quotes `arg` for a POSIX shell.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Compiler wrapper scripts routed through the accounting wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerWrappers {
    pub cc: PathBuf,
    pub cxx: PathBuf,
}

impl CompilerWrappers {
    /// Writes `cc.sh` and `cxx.sh` into `dir`.
    ///
    /// The real compiler is left unquoted so launcher prefixes such as
    /// `ccache gcc` keep working.
    pub fn write(session: &Session, dir: &Path) -> io::Result<Self> {
        let tools = session.tools();
        let wrapper: Vec<String> = tools.time_command.iter().map(|a| shell_quote(a)).collect();
        let wrapper = wrapper.join(" ");

        let cc = dir.join("cc.sh");
        let cxx = dir.join("cxx.sh");
        write_executable(&cc, &format!("#!/bin/sh\nexec {} {} \"$@\"\n", wrapper, tools.cc))?;
        write_executable(&cxx, &format!("#!/bin/sh\nexec {} {} \"$@\"\n", wrapper, tools.cxx))?;
        Ok(Self { cc, cxx })
    }

    fn env(&self) -> [(&'static str, String); 2] {
        [
            ("CC", self.cc.display().to_string()),
            ("CXX", self.cxx.display().to_string()),
        ]
    }
}

fn write_executable(path: &Path, content: &str) -> io::Result<()> {
    fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Runs CONFIGURE, COMPILE and VERIFY for one source tree.
#[derive(Debug)]
pub struct BuildInstrumentor<'a> {
    session: &'a Session,
    modules: BTreeSet<String>,
}

impl<'a> BuildInstrumentor<'a> {
    /// `modules` is fixed for the whole build.
    pub fn new(session: &'a Session, modules: BTreeSet<String>) -> Self {
        Self { session, modules }
    }

    /// Builds `source_dir` into `build_dir` and returns the build metrics.
    pub fn run(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        configure_options: Option<&str>,
    ) -> Result<MetricMap, BuildError> {
        fs::create_dir_all(build_dir)?;
        let wrappers = CompilerWrappers::write(self.session, build_dir)?;
        let mut metrics = MetricMap::new();

        info!("Stage {}: {}", BuildStage::Configure, source_dir.display());
        self.configure(source_dir, build_dir, configure_options, &wrappers, &mut metrics)?;

        info!("Stage {}: {} modules", BuildStage::Compile, self.modules.len());
        let processor = self.compile(build_dir, &wrappers)?;
        info!(
            "Compile finished: {} samples attributed, {} dropped",
            processor.attributed(),
            processor.dropped()
        );

        info!("Stage {}", BuildStage::Verify);
        self.verify(build_dir, &wrappers)?;

        processor.finish(&mut metrics);
        info!("Stage {}: {} build metrics", BuildStage::Done, metrics.len());
        Ok(metrics)
    }

    fn configure(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        configure_options: Option<&str>,
        wrappers: &CompilerWrappers,
        metrics: &mut MetricMap,
    ) -> Result<(), BuildError> {
        let mut args = self.session.tools().configure_command.clone();
        if let Some(options) = configure_options {
            args.extend(options.split_whitespace().map(str::to_string));
        }
        args.push(source_dir.display().to_string());

        let mut invocation = Invocation::new(args).current_dir(build_dir);
        for (key, value) in wrappers.env() {
            invocation = invocation.env(key, value);
        }

        let sample = ProcessTimer::new(self.session)
            .run(&invocation, ExitPolicy::Require)
            .map_err(BuildError::Configure)?;
        debug!("Configure sample: {:?}", sample);

        metrics.insert(
            "cmake.cpu_walltime".to_string(),
            MetricValue::Float(sample.cpu_walltime),
        );
        metrics.insert("cmake.memory_max".to_string(), sample.memory_max.into());
        Ok(())
    }

    fn compile(
        &self,
        build_dir: &Path,
        wrappers: &CompilerWrappers,
    ) -> Result<BuildOutputProcessor, BuildError> {
        let driver = &self.session.tools().build_command;
        let command_line = driver.join(" ");

        // stderr is folded into stdout by the shell so accounting lines keep
        // their position relative to the progress lines.
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("exec \"$@\" 2>&1")
            .arg("sh")
            .args(driver)
            .current_dir(build_dir)
            .envs(wrappers.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped());

        let mut child = self.session.spawn(&mut command).map_err(|source| {
            BuildError::Compile(ProcessError::Spawn {
                command: command_line.clone(),
                source,
            })
        })?;
        let pid = child.id();

        let mut processor =
            BuildOutputProcessor::new(&self.modules, self.session.memory_calibration());
        let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);

        let read_result = match child.stdout.take() {
            Some(stdout) => read_driver_output(stdout, |line| {
                trace!("{}", line);
                processor.process_line(line);
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "build driver stdout not captured",
            )),
        };

        if let Err(e) = read_result {
            warn!("Lost build driver output, terminating `{}`: {}", command_line, e);
            self.session.children().terminate(pid);
            let _ = child.kill();
            let _ = child.wait();
            return Err(BuildError::DriverStream(e));
        }

        let status = child.wait();
        self.session.release(pid);
        let status = status.map_err(|source| {
            BuildError::Compile(ProcessError::Spawn {
                command: command_line.clone(),
                source,
            })
        })?;
        if !status.success() {
            let output: Vec<String> = tail.into_iter().collect();
            return Err(BuildError::Compile(ProcessError::Exit {
                command: command_line,
                status: exit_status(&status),
                output: output.join("\n"),
            }));
        }

        Ok(processor)
    }

    fn verify(&self, build_dir: &Path, wrappers: &CompilerWrappers) -> Result<(), BuildError> {
        let mut invocation =
            Invocation::new(self.session.tools().verify_command.clone()).current_dir(build_dir);
        for (key, value) in wrappers.env() {
            invocation = invocation.env(key, value);
        }
        run_captured(self.session, &invocation).map_err(BuildError::Verify)?;
        Ok(())
    }
}

/// Feeds each line of `reader` to `on_line`, in order.
///
/// Invalid UTF-8 is replaced rather than treated as an error; only a
/// failing read aborts.
fn read_driver_output<R: io::Read>(reader: R, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        // Lossy on purpose: a stray non-UTF-8 byte in compiler output must
        // not abort the build; only a failed read does.
        on_line(String::from_utf8_lossy(&buf).trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("time: %U"), "'time: %U'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(BuildStage::Configure.to_string(), "CONFIGURE");
        assert_eq!(BuildStage::Done.to_string(), "DONE");
    }

    #[test]
    fn test_read_driver_output_lossy_lines() {
        let input: &[u8] = b"one\r\ntwo \xff\nthree";
        let mut lines = Vec::new();
        read_driver_output(input, |l| lines.push(l.to_string())).unwrap();
        assert_eq!(lines, vec!["one", "two \u{fffd}", "three"]);
    }

    #[test]
    fn test_read_driver_output_error_aborts() {
        struct Broken;
        impl io::Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
        }
        let err = read_driver_output(Broken, |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[cfg(unix)]
    mod end_to_end {
        use super::super::*;
        use crate::testutil::{fake_time_tools, write_script};
        use crate::timer::calibration::MemoryCalibration;

        const DRIVER_OUTPUT: &str = r#"
echo 'time: 9.00 9.00 9.00 9% 9 0' >&2
echo '[ 10%] Building CXX object foo/CMakeFiles/foo.dir/a.cxx.o'
echo 'time: 1.00 0.50 2.00 50% 1000 0' >&2
echo '[ 20%] Building CXX object bar/CMakeFiles/bar.dir/b.cxx.o'
echo 'time: 2.00 1.00 4.00 100% 3000 0' >&2
echo '[ 30%] Linking CXX shared library ../lib/libbar.so'
echo 'time: 0.50 0.25 1.00 150% 5000 0' >&2
echo 'Scanning dependencies of target docs'
echo 'time: garbage' >&2
echo '[ 40%] Generating docs'
echo 'time: 1.00 1.00 1.00 20% 2000 0' >&2
"#;

        fn modules() -> BTreeSet<String> {
            ["foo", "bar"].iter().map(|s| s.to_string()).collect()
        }

        fn session_with(dir: &Path, driver_body: &str, verify_body: &str) -> Session {
            let mut tools = fake_time_tools(dir, "time: 0.30 0.10 0.50 80% 4000 0");
            let configure = dir.join("fake-cmake");
            let driver = dir.join("fake-make");
            let verify = dir.join("fake-verify");
            write_script(&configure, "test -d \"$1\" || exit 1\n");
            write_script(&driver, driver_body);
            write_script(&verify, verify_body);
            tools.configure_command = vec![configure.display().to_string()];
            tools.build_command = vec![driver.display().to_string()];
            tools.verify_command = vec![verify.display().to_string()];
            Session::with_memory_calibration(tools, MemoryCalibration::default())
        }

        #[test]
        fn test_build_produces_expected_metrics() {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            let session = session_with(dir.path(), DRIVER_OUTPUT, "exit 0\n");

            let metrics = BuildInstrumentor::new(&session, modules())
                .run(&src, &dir.path().join("build"), None)
                .unwrap();

            let expected: MetricMap = [
                ("cmake.cpu_walltime", MetricValue::Float(0.5)),
                ("cmake.memory_max", MetricValue::Int(4000 * 1024)),
                ("make.foo.cpu_walltime", MetricValue::Float(2.0)),
                ("make.foo.cpu_user", MetricValue::Float(1.0)),
                ("make.foo.cpu_system", MetricValue::Float(0.5)),
                ("make.foo.cpu_percent_avg", MetricValue::Int(50)),
                ("make.foo.cpu_percent_max", MetricValue::Int(50)),
                ("make.foo.memory_avg", MetricValue::Int(1000 * 1024)),
                ("make.foo.memory_max", MetricValue::Int(1000 * 1024)),
                ("make.bar.cpu_walltime", MetricValue::Float(6.0)),
                ("make.bar.cpu_user", MetricValue::Float(3.5)),
                ("make.bar.cpu_system", MetricValue::Float(2.25)),
                ("make.bar.cpu_percent_avg", MetricValue::Int(90)),
                ("make.bar.cpu_percent_max", MetricValue::Int(150)),
                ("make.bar.memory_avg", MetricValue::Int(10_000 * 1024 / 3)),
                ("make.bar.memory_max", MetricValue::Int(5000 * 1024)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            assert_eq!(metrics, expected);
            assert!(session.children().is_empty());
        }

        #[test]
        fn test_compiler_wrappers_route_through_accounting() {
            let dir = tempfile::tempdir().unwrap();
            let session = session_with(dir.path(), "exit 0\n", "exit 0\n");

            let wrappers = CompilerWrappers::write(&session, dir.path()).unwrap();
            let cc = fs::read_to_string(&wrappers.cc).unwrap();
            assert!(cc.starts_with("#!/bin/sh\nexec '"));
            assert!(cc.ends_with(" gcc \"$@\"\n"));
            assert!(cc.contains("fake-time'"));
            let cxx = fs::read_to_string(&wrappers.cxx).unwrap();
            assert!(cxx.ends_with(" g++ \"$@\"\n"));
        }

        #[test]
        fn test_wrapper_prints_accounting_after_program_output() {
            let dir = tempfile::tempdir().unwrap();
            let mut tools = fake_time_tools(dir.path(), "time: 0.30 0.10 0.50 80% 4000 0");
            tools.cc = "echo compiled".to_string();
            let session = Session::with_memory_calibration(tools, MemoryCalibration::default());

            let wrappers = CompilerWrappers::write(&session, dir.path()).unwrap();
            let mut lines = Vec::new();
            let output = Command::new("sh")
                .arg("-c")
                .arg("exec \"$@\" 2>&1")
                .arg("sh")
                .arg(&wrappers.cc)
                .arg("a.c")
                .output()
                .unwrap();
            read_driver_output(output.stdout.as_slice(), |l| lines.push(l.to_string())).unwrap();
            assert_eq!(lines, vec!["compiled a.c", "time: 0.30 0.10 0.50 80% 4000 0"]);
        }

        #[test]
        fn test_configure_failure_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let session = session_with(dir.path(), DRIVER_OUTPUT, "exit 0\n");

            let err = BuildInstrumentor::new(&session, modules())
                .run(&dir.path().join("missing-src"), &dir.path().join("build"), None)
                .unwrap_err();
            assert!(matches!(err, BuildError::Configure(ProcessError::Exit { .. })));
        }

        #[test]
        fn test_driver_failure_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            let session = session_with(
                dir.path(),
                "echo 'make: *** [all] Error 2'\nexit 2\n",
                "exit 0\n",
            );

            let err = BuildInstrumentor::new(&session, modules())
                .run(&src, &dir.path().join("build"), None)
                .unwrap_err();
            match err {
                BuildError::Compile(ProcessError::Exit { status, output, .. }) => {
                    assert_eq!(status, "2");
                    assert!(output.contains("Error 2"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_verify_failure_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            let session = session_with(dir.path(), DRIVER_OUTPUT, "exit 1\n");

            let err = BuildInstrumentor::new(&session, modules())
                .run(&src, &dir.path().join("build"), None)
                .unwrap_err();
            assert!(matches!(err, BuildError::Verify(_)));
        }

        #[test]
        fn test_configure_options_are_split() {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            let session = session_with(dir.path(), "exit 0\n", "exit 0\n");
            let args_file = dir.path().join("args");
            let configure = dir.path().join("fake-cmake");
            write_script(
                &configure,
                &format!("echo \"$@\" > {}\n", args_file.display()),
            );

            BuildInstrumentor::new(&session, modules())
                .run(&src, &dir.path().join("build"), Some("-DUSE_ROOT=OFF  -DFOO=1"))
                .unwrap();
            assert_eq!(
                fs::read_to_string(args_file).unwrap().trim(),
                format!("-DUSE_ROOT=OFF -DFOO=1 {}", src.display())
            );
        }
    }
}
