//! Resolution of declared tests to runnable command lines.
//!
//! Script tests live somewhere below `<build>/<module>/resources`; compiled
//! tests are staged as `<build>/bin/<module>-<test>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::listing::DeclaredTest;
use crate::collector::FileSystem;
use crate::error::TestResolutionError;
use crate::session::ToolConfig;

/// How a declared test is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTest {
    /// A script run through an interpreter.
    Script {
        interpreter: Vec<String>,
        path: PathBuf,
    },
    /// A compiled test binary, relative to the build directory.
    Binary { path: PathBuf, args: Vec<String> },
}

impl ResolvedTest {
    /// Argv to run from the build directory.
    pub fn argv(&self) -> Vec<String> {
        match self {
            ResolvedTest::Script { interpreter, path } => {
                let mut argv = interpreter.clone();
                argv.push(path.display().to_string());
                argv
            }
            ResolvedTest::Binary { path, args } => {
                let mut argv = vec![path.display().to_string()];
                argv.extend(args.iter().cloned());
                argv
            }
        }
    }
}

/// File name to path for every file below one directory.
type DirIndex = HashMap<String, PathBuf>;

/// Resolves tests for one build directory, caching resource-tree walks.
pub struct TestResolver<'a, F: FileSystem> {
    fs: &'a F,
    tools: &'a ToolConfig,
    build_dir: PathBuf,
    walk_cache: HashMap<PathBuf, DirIndex>,
}

impl<'a, F: FileSystem> TestResolver<'a, F> {
    pub fn new(fs: &'a F, tools: &'a ToolConfig, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            tools,
            build_dir: build_dir.into(),
            walk_cache: HashMap::new(),
        }
    }

    /// Number of directories walked so far.
    pub fn walked_dirs(&self) -> usize {
        self.walk_cache.len()
    }

    pub fn resolve(&mut self, test: &DeclaredTest) -> Result<ResolvedTest, TestResolutionError> {
        match self.tools.interpreter_for(&test.name) {
            Some(interpreter) => {
                let interpreter = interpreter.to_vec();
                if interpreter.is_empty() {
                    return Err(TestResolutionError::NoInterpreter(test.full_name()));
                }
                let dir = self.build_dir.join(&test.module).join("resources");
                let path = self.find_file(&dir, &test.name).ok_or_else(|| {
                    TestResolutionError::ScriptNotFound {
                        name: test.name.clone(),
                        dir: dir.clone(),
                    }
                })?;
                Ok(ResolvedTest::Script { interpreter, path })
            }
            None => {
                let path = PathBuf::from("bin").join(format!("{}-{}", test.module, test.name));
                if !self.fs.exists(&self.build_dir.join(&path)) {
                    return Err(TestResolutionError::BinaryNotFound(path));
                }
                Ok(ResolvedTest::Binary {
                    path,
                    args: self.tools.binary_test_args.clone(),
                })
            }
        }
    }

    fn find_file(&mut self, dir: &Path, name: &str) -> Option<PathBuf> {
        if !self.walk_cache.contains_key(dir) {
            let mut index = DirIndex::new();
            walk(self.fs, dir, &mut index);
            debug!("Indexed {} files under {}", index.len(), dir.display());
            self.walk_cache.insert(dir.to_path_buf(), index);
        }
        self.walk_cache.get(dir)?.get(name).cloned()
    }
}

/// Depth-first walk in name order; the first file seen for a name wins.
fn walk<F: FileSystem>(fs: &F, dir: &Path, index: &mut DirIndex) {
    let Ok(mut entries) = fs.read_dir(dir) else {
        return;
    };
    entries.sort();
    for entry in entries {
        if fs.read_dir(&entry).is_ok() {
            walk(fs, &entry, index);
        } else if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
            index.entry(name.to_string()).or_insert(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn test(name: &str) -> DeclaredTest {
        DeclaredTest::parse(name).unwrap()
    }

    fn build_tree() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file("/b/suite/resources/test/check.py", "");
        fs.add_file("/b/suite/resources/a/deeper/check.py", "");
        fs.add_file("/b/suite/resources/other.py", "");
        fs.add_file("/b/bin/suite-check_bin", "");
        fs
    }

    #[test]
    fn test_resolve_script() {
        let fs = build_tree();
        let tools = ToolConfig::default();
        let mut resolver = TestResolver::new(&fs, &tools, "/b");

        let resolved = resolver.resolve(&test("suite::check.py")).unwrap();
        assert_eq!(
            resolved,
            ResolvedTest::Script {
                interpreter: vec!["python".to_string()],
                path: PathBuf::from("/b/suite/resources/a/deeper/check.py"),
            }
        );
        assert_eq!(
            resolved.argv(),
            vec!["python", "/b/suite/resources/a/deeper/check.py"]
        );
    }

    #[test]
    fn test_resolve_binary() {
        let fs = build_tree();
        let tools = ToolConfig::default();
        let mut resolver = TestResolver::new(&fs, &tools, "/b");

        let resolved = resolver.resolve(&test("suite::check_bin")).unwrap();
        assert_eq!(resolved.argv(), vec!["bin/suite-check_bin", "-a"]);
    }

    #[test]
    fn test_missing_targets() {
        let fs = build_tree();
        let tools = ToolConfig::default();
        let mut resolver = TestResolver::new(&fs, &tools, "/b");

        assert!(matches!(
            resolver.resolve(&test("suite::missing.py")),
            Err(TestResolutionError::ScriptNotFound { .. })
        ));
        assert!(matches!(
            resolver.resolve(&test("nomodule::x.py")),
            Err(TestResolutionError::ScriptNotFound { .. })
        ));
        assert!(matches!(
            resolver.resolve(&test("suite::missing_bin")),
            Err(TestResolutionError::BinaryNotFound(_))
        ));
    }

    #[test]
    fn test_walk_is_cached_per_directory() {
        let mut fs = build_tree();
        fs.add_file("/b/other/resources/x.py", "");
        let tools = ToolConfig::default();
        let mut resolver = TestResolver::new(&fs, &tools, "/b");

        resolver.resolve(&test("suite::check.py")).unwrap();
        resolver.resolve(&test("suite::other.py")).unwrap();
        let _ = resolver.resolve(&test("suite::missing.py"));
        assert_eq!(resolver.walked_dirs(), 1);

        resolver.resolve(&test("other::x.py")).unwrap();
        assert_eq!(resolver.walked_dirs(), 2);
    }

    #[test]
    fn test_empty_interpreter_is_error() {
        let fs = build_tree();
        let mut tools = ToolConfig::default();
        tools.interpreters = vec![(".py".to_string(), Vec::new())];
        let mut resolver = TestResolver::new(&fs, &tools, "/b");

        assert!(matches!(
            resolver.resolve(&test("suite::check.py")),
            Err(TestResolutionError::NoInterpreter(_))
        ));
    }
}
