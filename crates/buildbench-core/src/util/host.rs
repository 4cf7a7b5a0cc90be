//! Identity of the measuring machine, used to tag delivered metrics.

use std::path::Path;

use tracing::warn;

use crate::collector::FileSystem;
use crate::session::Session;
use crate::timer::{Invocation, run_captured};

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Host name from the kernel, then `HOSTNAME`, then `localhost`.
pub fn hostname<F: FileSystem>(fs: &F) -> String {
    fs.read_to_string(Path::new(HOSTNAME_PATH))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

/// Version from the first line of `gcc --version`.
///
/// `gcc (Ubuntu 11.4.0-1ubuntu1~22.04) 11.4.0` gives `11.4.0`; the first
/// token after the closing parenthesis.
pub fn parse_compiler_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    let (_, rest) = first.split_once(')')?;
    rest.split_whitespace().next().map(str::to_string)
}

/// Version of the session's C compiler, or `unknown`.
pub fn compiler_version(session: &Session) -> String {
    let mut argv: Vec<String> = session
        .tools()
        .cc
        .split_whitespace()
        .map(str::to_string)
        .collect();
    argv.push("--version".to_string());

    match run_captured(session, &Invocation::new(argv)) {
        Ok(output) => parse_compiler_version(&output).unwrap_or_else(|| {
            warn!("Cannot parse compiler version from {:?}", output.lines().next());
            "unknown".to_string()
        }),
        Err(e) => {
            warn!("Cannot query compiler version: {}", e);
            "unknown".to_string()
        }
    }
}

/// Host name and compiler version of this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub compiler_version: String,
}

impl HostIdentity {
    pub fn detect<F: FileSystem>(fs: &F, session: &Session) -> Self {
        Self {
            hostname: hostname(fs),
            compiler_version: compiler_version(session),
        }
    }
}
