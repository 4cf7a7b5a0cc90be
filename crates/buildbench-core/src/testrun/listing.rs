//! Parsing of the test lister's output (`ctest -N`).

use crate::error::TestResolutionError;

/// A declared test split into its owning module and test name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredTest {
    pub module: String,
    pub name: String,
}

impl DeclaredTest {
    /// Splits `module::name`.
    pub fn parse(full_name: &str) -> Result<Self, TestResolutionError> {
        let malformed = || TestResolutionError::MalformedName(full_name.to_string());
        let (module, name) = full_name.split_once("::").ok_or_else(malformed)?;
        if module.is_empty() || name.is_empty() || name.contains("::") {
            return Err(malformed());
        }
        Ok(Self {
            module: module.to_string(),
            name: name.to_string(),
        })
    }

    /// `module::name`, as declared.
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }
}

/// Test names in declaration order.
///
/// Only lines of the form `  Test  #3: module::name` are considered.
pub fn parse_test_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("  Test"))
        .filter_map(|line| line.split_once(':'))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Test project /scratch/build
  Test  #1: dataio::main
  Test  #2: dataio::test_pickle.py
  Test #10: icetray::a_first.py
  Test #11: icetray::b_second.py

Total Tests: 4
";

    #[test]
    fn test_parse_listing_preserves_order() {
        assert_eq!(
            parse_test_listing(LISTING),
            vec![
                "dataio::main",
                "dataio::test_pickle.py",
                "icetray::a_first.py",
                "icetray::b_second.py",
            ]
        );
    }

    #[test]
    fn test_parse_listing_empty() {
        assert!(parse_test_listing("Test project /x\n\nTotal Tests: 0\n").is_empty());
    }

    #[test]
    fn test_declared_test_parse() {
        let test = DeclaredTest::parse("suite::check.py").unwrap();
        assert_eq!(test.module, "suite");
        assert_eq!(test.name, "check.py");
        assert_eq!(test.full_name(), "suite::check.py");
    }

    #[test]
    fn test_declared_test_malformed() {
        for name in ["nomodule", "::x", "x::", "a::b::c"] {
            assert!(matches!(
                DeclaredTest::parse(name),
                Err(TestResolutionError::MalformedName(_))
            ));
        }
    }
}
