//! In-memory filesystem and process-tree scenarios for tests.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
