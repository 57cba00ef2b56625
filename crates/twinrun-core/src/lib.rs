//! # twinrun-core
//!
//! Shared primitives for twinrun, an A/B comparison runner that executes a
//! benchmark and a test variant of the same worker over an identical batch of
//! inputs and reports field-level differences between their outputs.
//!
//! This crate provides:
//!
//! - **Identifiers**: Typed IDs for work items, result records, and transport messages
//! - **Configuration**: The immutable [`config::RunConfig`] passed to every component
//! - **Workspace**: Layout and plain-text files of the local run workspace
//! - **Observability**: Logging initialization and span helpers
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use twinrun_core::prelude::*;
//!
//! let task = TaskId::new("exp42")?;
//! assert_eq!(task.variant_resource_name(Variant::Test), "exp42_test");
//! # Ok::<(), twinrun_core::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod workspace;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        BackendConfig, DeployConfig, FunctionRuntime, RunConfig, TaskConfig, TeardownOrder,
        VariantSource,
    };
    pub use crate::error::{Error, Result};
    pub use crate::id::{ItemId, MessageId, ResultId, TaskId, Variant};
    pub use crate::workspace::RunWorkspace;
}
