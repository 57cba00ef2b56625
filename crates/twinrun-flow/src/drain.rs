//! Completion drain and result correlation.
//!
//! The drain polls the run's completion queue, resolves each signal to its
//! result record, and pairs records of the same item across the two variants.
//! Every complete pair is handed to the [`Comparator`] exactly once.
//!
//! ## State Machine
//!
//! ```text
//! DRAINING ──empty poll──▶ IDLE_COUNTING ──idle > threshold──▶ TERMINATED
//!    ▲                          │
//!    └────────signals───────────┘
//! ```
//!
//! The drain also terminates as soon as every item is paired.
//!
//! ## Delivery Semantics
//!
//! Signals are consumed at-least-once. Correlation is commutative and
//! idempotent: a redelivered signal for an already-paired item, or for a
//! variant already observed, changes nothing. Every signal in a batch is
//! acknowledged after the batch is processed, whatever its effect.
//!
//! Workers must write their record before posting the signal. Records missing
//! from a bulk fetch are fetched once more after [`DrainConfig::refetch_delay`];
//! signals whose record is still absent are logged and acknowledged.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use twinrun_core::config::RunConfig;
use twinrun_core::id::{ItemId, ResultId, Variant};

use crate::backend::{DeleteEntry, QueueService, ResultStore, DEFAULT_VISIBILITY_TIMEOUT, MAX_BATCH_SIZE};
use crate::compare::{Comparator, DiffReport};
use crate::error::Result;
use crate::metrics::{time_drain_batch, RunMetrics};
use crate::progress::ProgressSink;
use crate::record::{CompletionSignal, ResultRecord};

/// Default delay before re-fetching records missing from a bulk fetch.
pub const DEFAULT_REFETCH_DELAY: Duration = Duration::from_millis(500);

/// Drain settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Result store table holding worker records.
    pub table: String,
    /// Idle time after which the drain gives up.
    pub idle_threshold: Duration,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// Invisibility window of received signals.
    pub visibility_timeout: Duration,
    /// Delay before re-fetching missing records.
    pub refetch_delay: Duration,
}

impl DrainConfig {
    /// Derives drain settings from the run configuration.
    #[must_use]
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            table: config.deploy().result_table.clone(),
            idle_threshold: config.idle_threshold(),
            poll_interval: config.poll_interval(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            refetch_delay: DEFAULT_REFETCH_DELAY,
        }
    }
}

/// Drain loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// The last poll returned signals.
    Draining,
    /// Consecutive empty polls have accumulated `idle`.
    IdleCounting {
        /// Idle time so far.
        idle: Duration,
    },
    /// The drain has stopped.
    Terminated,
}

impl DrainState {
    /// Next state after an empty poll.
    #[must_use]
    pub fn on_empty_poll(self, threshold: Duration, poll_interval: Duration) -> Self {
        let idle = match self {
            Self::Draining => Duration::ZERO,
            Self::IdleCounting { idle } => idle,
            Self::Terminated => return Self::Terminated,
        };
        if idle > threshold {
            Self::Terminated
        } else {
            Self::IdleCounting {
                idle: idle + poll_interval,
            }
        }
    }
}

/// How the drain ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Every item was paired.
    Completed,
    /// No signal arrived within the idle threshold.
    TimedOut {
        /// Items still unpaired, sorted.
        unresolved: Vec<ItemId>,
    },
}

/// Effect of one observed record.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The record's item is not pending or the variant was already seen.
    Ignored,
    /// The first variant of a pending item.
    Partial,
    /// Both variants are now known; the item left the pending set.
    Completed {
        /// Item that completed.
        item_id: ItemId,
        /// Benchmark payload.
        benchmark: Value,
        /// Test payload.
        test: Value,
    },
}

#[derive(Debug, Default)]
struct PartialPair {
    benchmark: Option<Value>,
    test: Option<Value>,
}

/// Pairs result records by item across the two variants.
#[derive(Debug)]
pub struct Correlator {
    total: usize,
    pending: BTreeSet<ItemId>,
    partial: HashMap<ItemId, PartialPair>,
}

impl Correlator {
    /// Creates a correlator over a fixed item set. Duplicates and blank IDs
    /// are dropped.
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = ItemId>) -> Self {
        let pending: BTreeSet<ItemId> = items
            .into_iter()
            .filter(|id| !id.as_str().trim().is_empty())
            .collect();
        Self {
            total: pending.len(),
            pending,
            partial: HashMap::new(),
        }
    }

    /// Applies one record.
    pub fn observe(&mut self, record: ResultRecord) -> Observation {
        if !self.pending.contains(&record.item_id) {
            return Observation::Ignored;
        }
        let pair = self.partial.entry(record.item_id.clone()).or_default();
        let slot = match record.variant {
            Variant::Benchmark => &mut pair.benchmark,
            Variant::Test => &mut pair.test,
        };
        if slot.is_some() {
            return Observation::Ignored;
        }
        *slot = Some(record.payload);

        if pair.benchmark.is_none() || pair.test.is_none() {
            return Observation::Partial;
        }
        let Some(PartialPair {
            benchmark: Some(benchmark),
            test: Some(test),
        }) = self.partial.remove(&record.item_id)
        else {
            return Observation::Partial;
        };
        self.pending.remove(&record.item_id);
        Observation::Completed {
            item_id: record.item_id,
            benchmark,
            test,
        }
    }

    /// Number of items in the run.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Number of paired items.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.total - self.pending.len()
    }

    /// Returns true once every item is paired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Items not yet paired, sorted.
    #[must_use]
    pub fn unresolved(&self) -> Vec<ItemId> {
        self.pending.iter().cloned().collect()
    }
}

/// Counters of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Signals received, including redeliveries.
    pub signals: usize,
    /// Signals that did not advance correlation.
    pub ignored: usize,
    /// Signals whose record never appeared.
    pub missing: usize,
    /// Empty polls.
    pub idle_polls: usize,
}

/// Result of [`Drain::reduce`]. The diff report is always present.
#[derive(Debug)]
pub struct ReduceOutput {
    /// Drain outcome, or the transport error that stopped it.
    pub result: Result<DrainOutcome>,
    /// Final comparison report.
    pub diff: DiffReport,
    /// Wall time of the drain.
    pub elapsed: Duration,
    /// Drain counters.
    pub stats: DrainStats,
}

/// Formats a duration as `HH:MM:SS`.
#[must_use]
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Drains one completion queue.
pub struct Drain<'a> {
    queues: &'a dyn QueueService,
    results: &'a dyn ResultStore,
    completion_queue: &'a str,
    config: DrainConfig,
    progress: &'a dyn ProgressSink,
    metrics: RunMetrics,
}

impl<'a> Drain<'a> {
    /// Creates a drain over `completion_queue`.
    #[must_use]
    pub fn new(
        queues: &'a dyn QueueService,
        results: &'a dyn ResultStore,
        completion_queue: &'a str,
        config: DrainConfig,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            queues,
            results,
            completion_queue,
            config,
            progress,
            metrics: RunMetrics::new(),
        }
    }

    /// Drains until every item is paired or the drain idles out, then
    /// finalizes the comparison, even if the drain failed.
    #[tracing::instrument(skip_all, fields(queue = %self.completion_queue))]
    pub async fn reduce(&self, items: Vec<ItemId>) -> ReduceOutput {
        let start = Instant::now();
        let mut correlator = Correlator::new(items);
        let mut comparator = Comparator::new();
        let mut stats = DrainStats::default();

        let result = self.run(&mut correlator, &mut comparator, &mut stats).await;
        match &result {
            Ok(DrainOutcome::Completed) => tracing::info!(pairs = correlator.resolved(), "drain complete"),
            Ok(DrainOutcome::TimedOut { unresolved }) => tracing::warn!(
                unresolved = unresolved.len(),
                idle_threshold_secs = self.config.idle_threshold.as_secs(),
                "no new signals within idle threshold, terminating"
            ),
            Err(e) => tracing::error!(error = %e, "drain failed"),
        }

        ReduceOutput {
            result,
            diff: comparator.finalize(),
            elapsed: start.elapsed(),
            stats,
        }
    }

    /// Runs the drain loop against an existing correlator and comparator.
    ///
    /// # Errors
    ///
    /// Returns a transport error if a receive, fetch, or acknowledgement
    /// fails. Failures are not retried.
    pub async fn run(
        &self,
        correlator: &mut Correlator,
        comparator: &mut Comparator,
        stats: &mut DrainStats,
    ) -> Result<DrainOutcome> {
        let mut state = DrainState::Draining;
        self.metrics.set_pending(correlator.total());
        while !correlator.is_done() {
            let messages = self
                .queues
                .receive(self.completion_queue, MAX_BATCH_SIZE, self.config.visibility_timeout)
                .await?;

            if messages.is_empty() {
                state = state.on_empty_poll(self.config.idle_threshold, self.config.poll_interval);
                if state == DrainState::Terminated {
                    return Ok(DrainOutcome::TimedOut {
                        unresolved: correlator.unresolved(),
                    });
                }
                stats.idle_polls += 1;
                self.metrics.record_idle_poll();
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            state = DrainState::Draining;
            let signals: Vec<CompletionSignal> = messages
                .into_iter()
                .map(|m| CompletionSignal {
                    result_id: ResultId::new(m.body.trim()),
                    message_id: m.message_id,
                    receipt_handle: m.receipt_handle,
                })
                .collect();
            self.process_batch(&signals, correlator, comparator, stats).await?;
            self.progress
                .advance(correlator.resolved(), correlator.total(), "tasks processed");
        }
        Ok(DrainOutcome::Completed)
    }

    /// Resolves, correlates, and acknowledges one batch of signals.
    async fn process_batch(
        &self,
        signals: &[CompletionSignal],
        correlator: &mut Correlator,
        comparator: &mut Comparator,
        stats: &mut DrainStats,
    ) -> Result<()> {
        let _timer = time_drain_batch();
        stats.signals += signals.len();
        self.metrics.record_signals(signals.len());

        let mut keys: Vec<ResultId> = Vec::with_capacity(signals.len());
        let mut seen = HashSet::new();
        for signal in signals {
            if !signal.result_id.as_str().is_empty() && seen.insert(signal.result_id.clone()) {
                keys.push(signal.result_id.clone());
            }
        }

        let (records, missing) = self.fetch(&keys).await?;
        stats.missing += missing;
        let mut ignored = signals.len() - keys.len();
        for record in records {
            match correlator.observe(record) {
                Observation::Completed {
                    item_id,
                    benchmark,
                    test,
                } => {
                    comparator.compare(&benchmark, &test);
                    self.metrics.record_pair_completed();
                    tracing::debug!(item_id = %item_id, "pair compared");
                }
                Observation::Partial => {}
                Observation::Ignored => ignored += 1,
            }
        }
        stats.ignored += ignored;
        self.metrics.record_duplicate_signals(ignored);
        self.metrics.set_pending(correlator.total() - correlator.resolved());

        let entries = signals
            .iter()
            .map(|s| DeleteEntry {
                message_id: s.message_id.clone(),
                receipt_handle: s.receipt_handle.clone(),
            })
            .collect();
        self.queues.delete_batch(self.completion_queue, entries).await
    }

    /// Bulk-fetches records, re-fetching missing ones once after a delay.
    /// Returns the records and the number of keys that stayed absent.
    async fn fetch(&self, keys: &[ResultId]) -> Result<(Vec<ResultRecord>, usize)> {
        if keys.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let mut records = self.results.batch_get(&self.config.table, keys).await?;
        let found: HashSet<&ResultId> = records.iter().map(|r| &r.result_id).collect();
        let missing: Vec<ResultId> = keys
            .iter()
            .filter(|k| !found.contains(k))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok((records, 0));
        }

        tracing::debug!(missing = missing.len(), "records absent from bulk fetch, re-fetching");
        tokio::time::sleep(self.config.refetch_delay).await;
        let late = self.results.batch_get(&self.config.table, &missing).await?;
        let still_missing = missing.len().saturating_sub(late.len());
        if still_missing > 0 {
            let late_ids: HashSet<&ResultId> = late.iter().map(|r| &r.result_id).collect();
            for id in missing.iter().filter(|id| !late_ids.contains(id)) {
                tracing::warn!(result_id = %id, "signal references a record that does not exist");
            }
            self.metrics.record_missing_records(still_missing);
        }
        records.extend(late);
        Ok((records, still_missing))
    }
}
