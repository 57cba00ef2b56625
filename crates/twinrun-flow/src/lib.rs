//! # twinrun-flow
//!
//! Pipeline engine for twinrun comparison runs.
//!
//! A run deploys two pipelines, one per variant, that share a completion
//! queue. Each pipeline is an input queue bound to a compute function running
//! that variant's worker. This crate provides:
//!
//! - **Deployment Ledger**: Durable, ordered record of every created resource
//! - **Provisioning**: Builds, packages, and deploys both pipelines
//! - **Dispatch**: Fans work items out to both input queues in bounded batches
//! - **Drain**: Collects completion signals, pairs results, and stops when idle
//! - **Comparison**: Field-level diffs aggregated into a per-field report
//! - **Teardown**: Ledger-driven, resumable deletion of every resource
//!
//! ## Core Concepts
//!
//! - **Work item**: An opaque ID sent to both variants
//! - **Result record**: One variant's output for one item, in the result store
//! - **Completion signal**: A message carrying a result record's ID
//! - **Pair**: The benchmark and test records of one item
//!
//! ## Guarantees
//!
//! - **Recoverable**: Every created resource is in the ledger before the next step runs
//! - **Idempotent Cleanup**: Deleting an absent resource counts as success
//! - **Order Independent**: Pairs are detected whichever variant finishes first
//! - **Bounded**: The drain terminates after a configurable idle period
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use twinrun_flow::compare::Comparator;
//!
//! let mut comparator = Comparator::new();
//! comparator.compare(&json!({"a": 1, "b": {"c": 2}}), &json!({"a": 1, "b": {"c": 5}}));
//!
//! let report = comparator.finalize();
//! assert_eq!(report.cases_with_diff, 1);
//! assert_eq!(report.fields[0].name, "b.c");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod artifact;
pub mod backend;
pub mod compare;
pub mod dispatch;
pub mod drain;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod progress;
pub mod provision;
pub mod record;
pub mod runner;
pub mod teardown;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::artifact::{ArtifactBuilder, CommandArtifactBuilder, HandlerContext};
    pub use crate::backend::{
        ComputePlatform, DeleteOutcome, Platform, QueueHandle, QueueOptions, QueueService,
        ResultStore,
    };
    pub use crate::compare::{Comparator, DiffReport, DiffValue, FieldSummary};
    pub use crate::dispatch::{DispatchSummary, Dispatcher, QueueDescriptor};
    pub use crate::drain::{Correlator, Drain, DrainConfig, DrainOutcome, ReduceOutput};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::{DeploymentRecord, Ledger, ResourceKind};
    pub use crate::progress::{NoProgress, ProgressSink};
    pub use crate::provision::{PipelineVariant, ProvisionedRun, Provisioner};
    pub use crate::record::{CompletionSignal, ResultRecord};
    pub use crate::runner::{ComparisonRun, FullRunReport};
    pub use crate::teardown::{Teardown, TeardownSummary};
}
