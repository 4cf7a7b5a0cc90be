//! `/proc` access for the live process monitor.
//!
//! All reads go through the [`FileSystem`] trait so process-tree sampling can
//! be exercised against [`MockFs`] scenarios as well as the real `/proc`.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     ProcessTreeSampler       │
//! │  - /proc/[pid]/stat          │
//! │  - parent map, descendants   │
//! └──────────────┬───────────────┘
//!                │
//!         ┌──────▼──────┐
//!         │  FileSystem │ (trait)
//!         └──────┬──────┘
//!        ┌───────┴───────┐
//!  ┌─────▼─────┐   ┌─────▼─────┐
//!  │  RealFs   │   │  MockFs   │
//!  └───────────┘   └───────────┘
//! ```

pub mod mock;
pub mod procfs;
pub mod traits;

pub use mock::MockFs;
pub use procfs::{ProcessTreeSampler, parse_proc_stat};
pub use traits::{FileSystem, RealFs};
