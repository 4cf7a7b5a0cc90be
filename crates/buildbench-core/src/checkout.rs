//! Checkout of the root project and its externals at a date revision.
//!
//! The root is checked out with immediate children only; every module
//! declared in its `svn:externals` property is then checked out in full at
//! the same date. The set of declared externals is also the module set used
//! for build attribution.

use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::CheckoutError;
use crate::session::Session;
use crate::timer::{Invocation, run_captured};

/// One `svn:externals` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct External {
    /// Directory name below the root, also the module name.
    pub name: String,
    pub url: String,
}

/// Parses `svn propget svn:externals` output.
///
/// Blank and `#` comment lines are skipped. A line with a single token is a
/// module without a URL; it still counts as a module but cannot be
/// checked out.
pub fn parse_externals(text: &str) -> Vec<External> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.next()?;
            Some(External {
                name: name.to_string(),
                url: tokens.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// `{YYYY-MM-DD}` revision specifier.
pub fn date_revision(date: NaiveDate) -> String {
    format!("{{{}}}", date.format("%Y-%m-%d"))
}

fn vcs(session: &Session, args: &[&str]) -> Invocation {
    let mut argv = session.tools().vcs_command.clone();
    argv.extend(args.iter().map(|a| a.to_string()));
    Invocation::new(argv)
}

/// Externals declared on a working copy.
pub fn externals(session: &Session, src_dir: &Path) -> Result<Vec<External>, CheckoutError> {
    let output = run_captured(
        session,
        &vcs(session, &["propget", "svn:externals"]).current_dir(src_dir),
    )?;
    Ok(parse_externals(&output))
}

/// Checks out `url` into `path` as of `date`, externals included.
pub fn checkout(
    session: &Session,
    url: &str,
    path: &Path,
    date: NaiveDate,
) -> Result<Vec<External>, CheckoutError> {
    let revision = date_revision(date);
    let path_arg = path.display().to_string();
    info!("Checking out {} at {} into {}", url, revision, path_arg);
    run_captured(
        session,
        &vcs(
            session,
            &["co", "-r", &revision, "--depth", "immediates", url, &path_arg],
        ),
    )?;

    let externals = externals(session, path)?;
    for external in &externals {
        if external.url.is_empty() {
            debug!("External {} has no URL, skipping checkout", external.name);
            continue;
        }
        let target = path.join(&external.name).display().to_string();
        debug!("Checking out external {} from {}", external.name, external.url);
        run_captured(
            session,
            &vcs(session, &["co", "-r", &revision, &external.url, &target]),
        )?;
    }
    info!("Checked out {} externals", externals.len());
    Ok(externals)
}
