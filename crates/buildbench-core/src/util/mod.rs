//! Small helpers shared by the binaries and the pipeline.

pub mod date_range;
pub mod host;

pub use date_range::{DateRangeError, date_range, parse_date};
pub use host::{HostIdentity, compiler_version, hostname, parse_compiler_version};
