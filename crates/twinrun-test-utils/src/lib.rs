//! Shared test utilities for twinrun integration tests.
//!
//! This crate provides:
//! - [`TestRun`]: A run configuration rooted in a temporary directory
//! - [`SimulatedWorker`]: A worker that follows the result-then-signal contract
//! - [`FaultyQueueService`] and [`FaultyCompute`]: Failure injection wrappers
//! - [`StubArtifactBuilder`] and [`RecordingProgress`]: Offline collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use twinrun_test_utils::{SimulatedWorker, TestRun};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let run = TestRun::memory("exp42");
//!     let items = run.write_items(25);
//!     // ... deploy, trigger, run workers, reduce ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod collaborators;
pub mod faults;
pub mod fixtures;
pub mod worker;

pub use collaborators::*;
pub use faults::*;
pub use fixtures::*;
pub use worker::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("twinrun_flow=debug".parse().expect("valid directive"))
                .add_directive("twinrun_core=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
