//! Attribution of compile/link samples to modules.
//!
//! Every accounting line is preceded by the driver's progress line naming
//! the artifact being built. The artifact's leading path segment (or, for a
//! link step, its file name) is matched against the known module names.
//!
//! When nothing matches, the sample goes to the module attributed last.
//! This assumes single-job build output; interleaved parallel output can
//! misattribute.

use std::collections::BTreeSet;

/// Artifact path named by a progress line, reduced to the segment that
/// carries the module name.
pub fn artifact_segment(progress: &str) -> Option<&str> {
    let line = strip_progress_marker(progress.trim());
    let token = line.split_whitespace().last()?;
    let segment = if line.starts_with("Linking") {
        token.rsplit('/').next()?
    } else {
        token.split('/').next()?
    };
    (!segment.is_empty()).then_some(segment)
}

/// Drops a leading `[ 42%]` progress marker.
fn strip_progress_marker(line: &str) -> &str {
    if line.starts_with('[')
        && let Some(end) = line.find(']')
    {
        return line[end + 1..].trim_start();
    }
    line
}

/// Module whose name occurs in the progress line's artifact segment.
///
/// `modules` must be ordered longest name first so that `foobar` wins over
/// `foo` when both occur.
pub fn match_module<'m>(progress: &str, modules: &'m [String]) -> Option<&'m str> {
    let segment = artifact_segment(progress)?;
    modules
        .iter()
        .find(|module| segment.contains(module.as_str()))
        .map(String::as_str)
}

/// Tracks the latest progress line and the module last attributed.
#[derive(Debug, Clone)]
pub struct ModuleAttributor {
    modules: Vec<String>,
    last_progress: Option<String>,
    last_module: Option<String>,
}

impl ModuleAttributor {
    pub fn new(modules: &BTreeSet<String>) -> Self {
        let mut modules: Vec<String> = modules.iter().filter(|m| !m.is_empty()).cloned().collect();
        modules.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self {
            modules,
            last_progress: None,
            last_module: None,
        }
    }

    /// Records a non-accounting line.
    pub fn observe_progress(&mut self, line: &str) {
        self.last_progress = Some(line.to_string());
    }

    /// Module for the accounting line that follows the latest progress line.
    ///
    /// Falls back to the previously attributed module; `None` only when no
    /// module has been attributed yet.
    pub fn attribute(&mut self) -> Option<&str> {
        let matched = self
            .last_progress
            .as_deref()
            .and_then(|line| match_module(line, &self.modules));
        if let Some(module) = matched {
            self.last_module = Some(module.to_string());
        }
        self.last_module.as_deref()
    }
}
