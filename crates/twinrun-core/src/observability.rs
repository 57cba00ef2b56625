//! Observability infrastructure for twinrun.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization helper and span constructors shared by the
//! provisioning, dispatch, and reduction phases.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for log shipping).
    Json,
    /// Pretty-printed logs (for development).
    Pretty,
    /// Single-line compact logs (for operator consoles).
    #[default]
    Compact,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `twinrun_flow=debug`)
///
/// `default_directive` is used when `RUST_LOG` is unset.
///
/// # Example
///
/// ```rust
/// use twinrun_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Compact, "info");
/// ```
pub fn init_logging(format: LogFormat, default_directive: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
            LogFormat::Compact => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().compact().with_target(false))
                    .init();
            }
        }
    });
}

/// Creates a span for a run phase with standard fields.
///
/// # Example
///
/// ```rust
/// use twinrun_core::observability::run_span;
///
/// let span = run_span("deploy", "exp42");
/// let _guard = span.enter();
/// // ... provision resources
/// ```
#[must_use]
pub fn run_span(phase: &str, task_id: &str) -> Span {
    tracing::info_span!("run", phase = phase, task_id = task_id)
}

/// Creates a span for work on a single variant pipeline.
#[must_use]
pub fn variant_span(phase: &str, task_id: &str, variant: &str) -> Span {
    tracing::info_span!("variant", phase = phase, task_id = task_id, variant = variant)
}
