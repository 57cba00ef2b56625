//! Observability metrics for comparison runs.
//!
//! Metrics are recorded through the `metrics` crate facade; without an
//! installed recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `twinrun_messages_dispatched_total` | Counter | `queue` | Work items sent to input queues |
//! | `twinrun_signals_received_total` | Counter | - | Completion signals received |
//! | `twinrun_duplicate_signals_total` | Counter | - | Signals for already-paired or unknown items |
//! | `twinrun_pairs_completed_total` | Counter | - | Items with both variants compared |
//! | `twinrun_idle_polls_total` | Counter | - | Empty completion-queue polls |
//! | `twinrun_missing_records_total` | Counter | - | Signals whose record was absent after re-fetch |
//! | `twinrun_teardown_deletions_total` | Counter | `kind`, `result` | Ledger entries processed by teardown |
//! | `twinrun_drain_batch_duration_seconds` | Histogram | - | Processing time of one signal batch |
//! | `twinrun_pending_items` | Gauge | - | Items not yet paired |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

use crate::ledger::ResourceKind;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Work items sent to input queues.
    pub const MESSAGES_DISPATCHED_TOTAL: &str = "twinrun_messages_dispatched_total";
    /// Counter: Completion signals received.
    pub const SIGNALS_RECEIVED_TOTAL: &str = "twinrun_signals_received_total";
    /// Counter: Signals that did not advance correlation.
    pub const DUPLICATE_SIGNALS_TOTAL: &str = "twinrun_duplicate_signals_total";
    /// Counter: Items with both variants compared.
    pub const PAIRS_COMPLETED_TOTAL: &str = "twinrun_pairs_completed_total";
    /// Counter: Empty completion-queue polls.
    pub const IDLE_POLLS_TOTAL: &str = "twinrun_idle_polls_total";
    /// Counter: Signals whose record was still absent after re-fetch.
    pub const MISSING_RECORDS_TOTAL: &str = "twinrun_missing_records_total";
    /// Counter: Ledger entries processed by teardown.
    pub const TEARDOWN_DELETIONS_TOTAL: &str = "twinrun_teardown_deletions_total";
    /// Histogram: Processing time of one signal batch in seconds.
    pub const DRAIN_BATCH_DURATION_SECONDS: &str = "twinrun_drain_batch_duration_seconds";
    /// Gauge: Items not yet paired.
    pub const PENDING_ITEMS: &str = "twinrun_pending_items";
}

/// Label keys used across metrics.
pub mod labels {
    /// Queue name.
    pub const QUEUE: &str = "queue";
    /// Ledger resource kind.
    pub const KIND: &str = "kind";
    /// Outcome (deleted, absent, skipped).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording run metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunMetrics;

impl RunMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records work items sent to a queue.
    pub fn record_dispatched(&self, queue: &str, count: usize) {
        counter!(
            names::MESSAGES_DISPATCHED_TOTAL,
            labels::QUEUE => queue.to_string(),
        )
        .increment(count as u64);
    }

    /// Records received completion signals.
    pub fn record_signals(&self, count: usize) {
        counter!(names::SIGNALS_RECEIVED_TOTAL).increment(count as u64);
    }

    /// Records signals that did not advance correlation.
    pub fn record_duplicate_signals(&self, count: usize) {
        counter!(names::DUPLICATE_SIGNALS_TOTAL).increment(count as u64);
    }

    /// Records a completed pair.
    pub fn record_pair_completed(&self) {
        counter!(names::PAIRS_COMPLETED_TOTAL).increment(1);
    }

    /// Records an empty poll.
    pub fn record_idle_poll(&self) {
        counter!(names::IDLE_POLLS_TOTAL).increment(1);
    }

    /// Records signals whose record never appeared.
    pub fn record_missing_records(&self, count: usize) {
        counter!(names::MISSING_RECORDS_TOTAL).increment(count as u64);
    }

    /// Records a processed ledger entry.
    pub fn record_teardown(&self, kind: ResourceKind, result: &'static str) {
        counter!(
            names::TEARDOWN_DELETIONS_TOTAL,
            labels::KIND => kind.as_str(),
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records drain batch processing time.
    pub fn observe_drain_batch(&self, duration: Duration) {
        histogram!(names::DRAIN_BATCH_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Sets the number of unpaired items.
    #[allow(clippy::cast_precision_loss)] // Item counts fit easily in f64
    pub fn set_pending(&self, count: usize) {
        gauge!(names::PENDING_ITEMS).set(count as f64);
    }
}

/// Calls a closure with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard that records drain batch latency.
#[must_use]
pub fn time_drain_batch() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| RunMetrics::new().observe_drain_batch(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_metrics_record_without_recorder() {
        let metrics = RunMetrics::new();
        metrics.record_dispatched("exp42_test", 10);
        metrics.record_signals(3);
        metrics.record_duplicate_signals(1);
        metrics.record_pair_completed();
        metrics.record_idle_poll();
        metrics.record_missing_records(1);
        metrics.record_teardown(ResourceKind::Queue, "deleted");
        metrics.set_pending(7);
        metrics.observe_drain_batch(Duration::from_millis(4));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }
}
