//! buildbench-core - shared library for the buildbench harness.
//!
//! Provides:
//! - `timer` - accounting-wrapped child processes (`ResourceSample`)
//! - `monitor` - background polling of a live process tree (`LiveStats`)
//! - `build` - multi-module build instrumentation and module attribution
//! - `testrun` - declared-test enumeration, resolution and timing
//! - `aggregate` - reduction of per-module distribution series
//! - `collector` - `/proc` access behind the `FileSystem` trait
//! - `checkout` - revision checkout of a root module and its externals
//! - `transport` - metric sinks (Graphite, Elasticsearch, stdout)
//! - `pipeline` - one complete checkout/build/test/deliver run
//! - `util` - date ranges and host identity helpers

pub mod aggregate;
pub mod build;
pub mod checkout;
pub mod collector;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod session;
pub mod testrun;
pub mod timer;
pub mod transport;
pub mod util;

#[cfg(all(test, unix))]
mod testutil;

pub use error::{
    AccountingParseError, BuildError, CheckoutError, ProcessError, RunError, TestResolutionError,
    TransportError,
};
pub use metrics::{MetricMap, MetricValue};
pub use session::{Session, ToolConfig};
pub use timer::{ExitPolicy, ProcessTimer, ResourceSample};
