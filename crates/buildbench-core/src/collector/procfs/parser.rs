//! Parser for `/proc/[pid]/stat`.
//!
//! Pure functions over file content so they can be tested with string input.

use thiserror::Error;

/// A `/proc` file did not have the expected layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error: {message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// The fields of `/proc/[pid]/stat` the process-tree sampler needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub ppid: u32,
    /// User-mode time in clock ticks.
    pub utime: u64,
    /// Kernel-mode time in clock ticks.
    pub stime: u64,
    /// Start time in clock ticks after boot; distinguishes reused PIDs.
    pub starttime: u64,
    /// Resident set size in pages.
    pub rss: i64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field can contain spaces and parentheses, so it is delimited by
/// the first `(` and the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    let field = |idx: usize, name: &str| -> Result<i64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };
    let field_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(ProcStat {
        pid,
        comm,
        ppid: field(1, "ppid")? as u32,
        utime: field_u64(11, "utime")?,
        stime: field_u64(12, "stime")?,
        starttime: field_u64(19, "starttime")?,
        rss: field(21, "rss")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat_basic() {
        let content = "1234 (bash) S 1233 1234 1234 0 -1 4194304 100 0 0 0 10 5 0 0 20 0 1 0 12345 12345678 100 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.ppid, 1233);
        assert_eq!(stat.utime, 10);
        assert_eq!(stat.stime, 5);
        assert_eq!(stat.starttime, 12345);
        assert_eq!(stat.rss, 100);
    }

    #[test]
    fn test_parse_proc_stat_comm_with_parentheses() {
        let content = "77 (weird) (name) R 1 77 77 0 -1 0 0 0 0 0 3 4 0 0 20 0 1 0 900 0 12";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.comm, "weird) (name");
        assert_eq!(stat.utime, 3);
        assert_eq!(stat.rss, 12);
    }

    #[test]
    fn test_parse_proc_stat_truncated() {
        let err = parse_proc_stat("1 (init) S 0 1 1").unwrap_err();
        assert!(err.message.contains("not enough fields"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = parse_proc_stat("x (sh) S 1").unwrap_err();
        assert_eq!(err.to_string(), "Parse error: invalid pid");
    }

    #[test]
    fn test_parse_proc_stat_missing_paren() {
        assert!(parse_proc_stat("1 init S 0").is_err());
    }
}
