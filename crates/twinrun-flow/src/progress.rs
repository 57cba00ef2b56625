//! Operator-facing progress reporting.
//!
//! Pipeline phases report coarse progress through a [`ProgressSink`]; the CLI
//! prints it to the console, tests use [`NoProgress`] or record it.

/// Receives phase and progress updates.
pub trait ProgressSink: Send + Sync {
    /// A phase or step has started.
    fn phase(&self, message: &str);

    /// `done` of `total` units have completed.
    fn advance(&self, done: usize, total: usize, unit: &str);
}

/// Discards all progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn phase(&self, _message: &str) {}

    fn advance(&self, _done: usize, _total: usize, _unit: &str) {}
}
