//! The accounting record emitted by the wrapper around every timed process.
//!
//! The wrapper is GNU time with a fixed format, producing one line
//!
//! ```text
//! time: <user> <system> <walltime> <percent>% <maxmem> <avgmem>
//! ```
//!
//! after the wrapped program's own output. Memory is in the tool's native
//! unit (kilobytes) and is normalised to bytes by [`MemoryCalibration`].
//!
//! [`MemoryCalibration`]: super::calibration::MemoryCalibration

use crate::error::AccountingParseError;

/// Prefix that marks an accounting line in mixed output.
pub const SENTINEL: &str = "time:";

/// GNU time format string producing a sentinel line.
pub const ACCOUNTING_FORMAT: &str = "time: %U %S %e %P %M %K";

/// One raw accounting record, memory still in native units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountingRecord {
    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_walltime: f64,
    pub cpu_percent: f64,
    pub memory_max: u64,
    pub memory_avg: u64,
}

/// Returns true when `line` is an accounting line rather than program output.
pub fn is_accounting_line(line: &str) -> bool {
    line.trim_start().starts_with(SENTINEL)
}

/// Parses an accounting line into its six fields.
pub fn parse_accounting_line(line: &str) -> Result<AccountingRecord, AccountingParseError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix(SENTINEL) else {
        return Err(AccountingParseError::Missing);
    };

    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(AccountingParseError::FieldCount {
            line: line.to_string(),
            found: fields.len(),
        });
    }

    let seconds = |idx: usize, field: &'static str| -> Result<f64, AccountingParseError> {
        fields[idx]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| AccountingParseError::InvalidField {
                field,
                value: fields[idx].to_string(),
            })
    };
    let memory = |idx: usize, field: &'static str| -> Result<u64, AccountingParseError> {
        fields[idx]
            .parse::<u64>()
            .map_err(|_| AccountingParseError::InvalidField {
                field,
                value: fields[idx].to_string(),
            })
    };

    Ok(AccountingRecord {
        cpu_user: seconds(0, "user")?,
        cpu_system: seconds(1, "system")?,
        cpu_walltime: seconds(2, "walltime")?,
        cpu_percent: parse_percent(fields[3])?,
        memory_max: memory(4, "maxmem")?,
        memory_avg: memory(5, "avgmem")?,
    })
}

/// GNU time prints `?%` when the wall time is too short to divide by.
fn parse_percent(raw: &str) -> Result<f64, AccountingParseError> {
    let value = raw.strip_suffix('%').unwrap_or(raw);
    if value == "?" {
        return Ok(0.0);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| AccountingParseError::InvalidField {
            field: "percent",
            value: raw.to_string(),
        })
}

/// Finds the last accounting line in captured output.
pub fn find_accounting_line(output: &str) -> Option<&str> {
    output.lines().rev().find(|line| is_accounting_line(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accounting_line() {
        let record = parse_accounting_line("time: 1.25 0.10 1.50 90% 20480 0").unwrap();
        assert_eq!(
            record,
            AccountingRecord {
                cpu_user: 1.25,
                cpu_system: 0.10,
                cpu_walltime: 1.50,
                cpu_percent: 90.0,
                memory_max: 20480,
                memory_avg: 0,
            }
        );
    }

    #[test]
    fn test_parse_accounting_line_is_deterministic() {
        let line = "time: 3.00 0.50 1.00 350% 1024 12";
        assert_eq!(
            parse_accounting_line(line).unwrap(),
            parse_accounting_line(line).unwrap()
        );
    }

    #[test]
    fn test_parse_unknown_percent() {
        let record = parse_accounting_line("time: 0.00 0.00 0.00 ?% 1200 0").unwrap();
        assert_eq!(record.cpu_percent, 0.0);
    }

    #[test]
    fn test_parse_multithreaded_percent() {
        let record = parse_accounting_line("  time: 4.00 0.00 1.00 400% 1200 0").unwrap();
        assert_eq!(record.cpu_percent, 400.0);
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let err = parse_accounting_line("time: 1.0 2.0 3.0").unwrap_err();
        assert!(matches!(err, AccountingParseError::FieldCount { found: 3, .. }));
    }

    #[test]
    fn test_parse_invalid_field() {
        let err = parse_accounting_line("time: 1.0 x 3.0 10% 5 0").unwrap_err();
        assert_eq!(
            err,
            AccountingParseError::InvalidField {
                field: "system",
                value: "x".to_string()
            }
        );
    }

    #[test]
    fn test_parse_not_accounting() {
        assert_eq!(
            parse_accounting_line("[ 10%] Building CXX object foo/a.o"),
            Err(AccountingParseError::Missing)
        );
    }

    #[test]
    fn test_find_accounting_line_takes_last() {
        let output = "Compile time: fast\ntime: 1 1 1 1% 1 1\nnoise\ntime: 2 2 2 2% 2 2\n";
        assert_eq!(find_accounting_line(output), Some("time: 2 2 2 2% 2 2"));
        assert_eq!(find_accounting_line("no record here"), None);
    }
}
