//! Classification of build-driver output lines.

use crate::timer::accounting::is_accounting_line;

/// One line of the driver's combined stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildLine<'a> {
    /// Whitespace only.
    Blank,
    /// An accounting record from the compiler wrapper.
    Accounting(&'a str),
    /// Anything else: progress messages, compiler diagnostics.
    Progress(&'a str),
}

impl<'a> BuildLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            BuildLine::Blank
        } else if is_accounting_line(line) {
            BuildLine::Accounting(line)
        } else {
            BuildLine::Progress(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(BuildLine::classify("   \n"), BuildLine::Blank);
        assert_eq!(
            BuildLine::classify("time: 1 1 1 1% 1 1\n"),
            BuildLine::Accounting("time: 1 1 1 1% 1 1")
        );
        assert_eq!(
            BuildLine::classify("[ 10%] Building CXX object foo/a.cxx.o"),
            BuildLine::Progress("[ 10%] Building CXX object foo/a.cxx.o")
        );
        assert_eq!(
            BuildLine::classify("Link time: 3s"),
            BuildLine::Progress("Link time: 3s")
        );
    }
}
