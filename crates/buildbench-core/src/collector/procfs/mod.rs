//! Parsers and samplers for the Linux `/proc` filesystem.

pub mod parser;
pub mod tree;

pub use parser::{ParseError, ProcStat, parse_proc_stat};
pub use tree::ProcessTreeSampler;
