//! Test runner: enumerates declared tests, resolves each to a command line
//! and times it inside the execution-environment wrapper.
//!
//! A test that cannot be resolved or that fails is logged and skipped; it
//! never aborts the remaining tests.

pub mod listing;
pub mod resolve;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::collector::{FileSystem, RealFs};
use crate::error::{ProcessError, RunError};
use crate::metrics::{MetricMap, insert_sample, sanitize_name};
use crate::session::Session;
use crate::timer::{ExitPolicy, Invocation, ProcessTimer, ResourceSample, run_captured};
pub use listing::{DeclaredTest, parse_test_listing};
pub use resolve::{ResolvedTest, TestResolver};

/// Options for one test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestRunConfig {
    /// Keep the metrics of tests that exit non-zero.
    pub record_failed_tests: bool,
}

/// Runs every declared test of a build directory.
#[derive(Debug)]
pub struct TestRunner<'a> {
    session: &'a Session,
    config: TestRunConfig,
}

impl<'a> TestRunner<'a> {
    pub fn new(session: &'a Session, config: TestRunConfig) -> Self {
        Self { session, config }
    }

    /// Declared test names, in declaration order.
    pub fn list(&self, build_dir: &Path) -> Result<Vec<String>, RunError> {
        let invocation =
            Invocation::new(self.session.tools().test_list_command.clone()).current_dir(build_dir);
        let output = run_captured(self.session, &invocation).map_err(RunError::TestListing)?;
        Ok(parse_test_listing(&output))
    }

    /// Runs all tests and returns `test.<name>.<field>` metrics.
    pub fn run(&self, build_dir: &Path) -> Result<MetricMap, RunError> {
        self.run_with_fs(&RealFs::new(), build_dir)
    }

    pub fn run_with_fs<F: FileSystem>(
        &self,
        fs: &F,
        build_dir: &Path,
    ) -> Result<MetricMap, RunError> {
        let names = self.list(build_dir)?;
        info!("Running {} declared tests", names.len());

        let mut resolver = TestResolver::new(fs, self.session.tools(), build_dir);
        let mut metrics = MetricMap::new();
        let mut skipped = 0;

        for full_name in &names {
            if self.session.children().is_cancelled() {
                return Err(RunError::Interrupted);
            }
            let resolved = DeclaredTest::parse(full_name).and_then(|t| resolver.resolve(&t));
            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Skipping test {}: {}", full_name, e);
                    skipped += 1;
                    continue;
                }
            };

            debug!("Running test {}: {:?}", full_name, resolved.argv());
            match self.run_one(build_dir, &resolved) {
                Ok(sample) => {
                    let prefix = format!("test.{}", sanitize_name(full_name));
                    insert_sample(&mut metrics, &prefix, &sample);
                }
                Err(e) => {
                    warn!("Test {} failed: {}", full_name, e);
                    if let Some(output) = e.output() {
                        debug!("Test {} output:\n{}", full_name, output);
                    }
                    skipped += 1;
                }
            }
        }

        if self.session.children().is_cancelled() {
            return Err(RunError::Interrupted);
        }
        info!(
            "Tests finished: {} recorded, {} skipped",
            names.len() - skipped,
            skipped
        );
        Ok(metrics)
    }

    fn run_one(
        &self,
        build_dir: &Path,
        resolved: &ResolvedTest,
    ) -> Result<ResourceSample, ProcessError> {
        let policy = if self.config.record_failed_tests {
            ExitPolicy::Tolerate
        } else {
            ExitPolicy::Require
        };
        let mut invocation = Invocation::new(resolved.argv()).current_dir(build_dir);
        if let Some(wrapper) = &self.session.tools().env_wrapper {
            invocation = invocation.launcher([wrapper.clone()]);
        }
        ProcessTimer::new(self.session).run(&invocation, policy)
    }
}
