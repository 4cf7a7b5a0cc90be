//! Helpers shared by unit tests that drive scripted fake tools.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::session::ToolConfig;

/// Writes an executable `/bin/sh` script.
pub(crate) fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Tools whose accounting wrapper runs its arguments and then prints
/// `record` to stderr, preserving the exit code.
pub(crate) fn fake_time_tools(dir: &Path, record: &str) -> ToolConfig {
    let time = dir.join("fake-time");
    write_script(
        &time,
        &format!("\"$@\"\nrc=$?\necho '{record}' >&2\nexit $rc\n"),
    );
    ToolConfig {
        time_command: vec![time.display().to_string()],
        calibration_workload: None,
        ..ToolConfig::default()
    }
}
