//! Ledger-driven teardown.
//!
//! Teardown walks the ledger and deletes each resource by kind. Every
//! successful deletion pops its entry, and the ledger is persisted after the
//! pass whether it succeeds or fails, so a retried teardown only revisits the
//! entries that remain.
//!
//! Deleting a resource that no longer exists counts as success. Shared mount
//! and data table entries are bookkeeping markers and are popped without any
//! deletion.

use std::path::Path;

use serde::Serialize;

use twinrun_core::config::TeardownOrder;

use crate::backend::{DeleteOutcome, Platform};
use crate::error::{Error, Result};
use crate::ledger::{DeploymentRecord, Ledger, ResourceKind};
use crate::metrics::RunMetrics;
use crate::progress::ProgressSink;

/// Summary of a completed teardown pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    /// Resources deleted.
    pub deleted: usize,
    /// Resources that were already gone.
    pub already_absent: usize,
    /// Marker entries skipped.
    pub skipped: usize,
}

impl TeardownSummary {
    /// Total entries removed from the ledger.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.deleted + self.already_absent + self.skipped
    }
}

/// Deletes ledger resources.
pub struct Teardown<'a> {
    platform: &'a Platform,
    order: TeardownOrder,
    progress: &'a dyn ProgressSink,
    metrics: RunMetrics,
}

impl<'a> Teardown<'a> {
    /// Creates a teardown pass.
    #[must_use]
    pub fn new(platform: &'a Platform, order: TeardownOrder, progress: &'a dyn ProgressSink) -> Self {
        Self {
            platform,
            order,
            progress,
            metrics: RunMetrics::new(),
        }
    }

    /// Deletes every ledger entry and persists the remainder, success or failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Teardown`] for the first entry that could not be
    /// deleted, or a storage error if the ledger cannot be written.
    #[tracing::instrument(skip_all, fields(entries = ledger.len(), order = ?self.order))]
    pub async fn run(&self, ledger: &mut Ledger) -> Result<TeardownSummary> {
        let outcome = self.drain_ledger(ledger).await;
        let persisted = ledger.persist();
        match (outcome, persisted) {
            (Ok(summary), Ok(())) => {
                tracing::info!(deleted = summary.deleted, absent = summary.already_absent, skipped = summary.skipped, "teardown complete");
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), persisted) => {
                if let Err(persist_err) = persisted {
                    tracing::error!(error = %persist_err, "failed to persist ledger after teardown failure");
                }
                tracing::warn!(error = %e, remaining = ledger.len(), "teardown stopped");
                Err(e)
            }
        }
    }

    async fn drain_ledger(&self, ledger: &mut Ledger) -> Result<TeardownSummary> {
        let mut summary = TeardownSummary::default();
        loop {
            let next = match self.order {
                TeardownOrder::Creation => ledger.front(),
                TeardownOrder::Reverse => ledger.back(),
            };
            let Some(record) = next.cloned() else {
                break;
            };

            match self.delete(&record).await? {
                Some(DeleteOutcome::Deleted) => summary.deleted += 1,
                Some(DeleteOutcome::AlreadyAbsent) => summary.already_absent += 1,
                None => summary.skipped += 1,
            }

            match self.order {
                TeardownOrder::Creation => ledger.pop_front(),
                TeardownOrder::Reverse => ledger.pop_back(),
            };
        }
        Ok(summary)
    }

    /// Deletes one resource. Returns `None` for marker entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Teardown`] if the deletion fails.
    pub async fn delete(&self, record: &DeploymentRecord) -> Result<Option<DeleteOutcome>> {
        let id = record.identifier.as_str();
        let outcome = match record.kind {
            ResourceKind::ComputeFunction => {
                self.progress.phase(&format!("Deleting compute function: {id}"));
                self.platform.compute.delete_function(id).await
            }
            ResourceKind::QueueBinding => {
                self.progress.phase(&format!("Deleting queue binding: {id}"));
                self.platform.compute.delete_binding(id).await
            }
            ResourceKind::Queue => {
                self.progress.phase(&format!("Deleting queue: {id}"));
                self.platform.queues.delete_queue(id).await
            }
            ResourceKind::LocalArtifact => {
                self.progress.phase(&format!("Deleting local files: {id}"));
                remove_tree(Path::new(id)).await
            }
            ResourceKind::SharedMount | ResourceKind::DataTable => {
                tracing::debug!(kind = %record.kind, identifier = %id, "skipping marker entry");
                self.metrics.record_teardown(record.kind, "skipped");
                return Ok(None);
            }
        };

        let outcome = outcome.map_err(|e| Error::Teardown {
            kind: record.kind,
            identifier: record.identifier.clone(),
            message: e.to_string(),
            source: Some(Box::new(e)),
        })?;
        let label = match outcome {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::AlreadyAbsent => {
                tracing::debug!(kind = %record.kind, identifier = %id, "resource already absent");
                "absent"
            }
        };
        self.metrics.record_teardown(record.kind, label);
        Ok(Some(outcome))
    }
}

async fn remove_tree(path: &Path) -> Result<DeleteOutcome> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(Error::storage_with_source(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryQueueService;
    use crate::backend::{QueueOptions, QueueService};
    use crate::progress::NoProgress;
    use std::sync::Arc;
    use twinrun_core::config::BackendConfig;

    #[tokio::test]
    async fn empty_ledger_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::from_config(&BackendConfig::Memory);
        let mut ledger = Ledger::new(dir.path().join("deployed_list.json"));

        let summary = Teardown::new(&platform, TeardownOrder::Creation, &NoProgress)
            .run(&mut ledger)
            .await
            .unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(Ledger::load(ledger.path()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn deletes_by_kind_and_skips_markers() {
        let dir = tempfile::tempdir().unwrap();
        let queues = Arc::new(InMemoryQueueService::new());
        let base = Platform::from_config(&BackendConfig::Memory);
        let platform = Platform::new(queues.clone(), base.results, base.compute);
        let queue = queues.create_queue("exp42_test", &QueueOptions::default()).await.unwrap();
        let tree = dir.path().join("exp42/test");
        std::fs::create_dir_all(tree.join("package")).unwrap();

        let mut ledger = Ledger::new(dir.path().join("deployed_list.json"));
        ledger.record(ResourceKind::LocalArtifact, tree.display().to_string());
        ledger.record(ResourceKind::SharedMount, "/mnt/efs/exp42/test");
        ledger.record(ResourceKind::Queue, queue.url.clone());
        ledger.record(ResourceKind::Queue, queue.url.clone());
        ledger.record(ResourceKind::DataTable, "backtesting-result");

        let summary = Teardown::new(&platform, TeardownOrder::Reverse, &NoProgress)
            .run(&mut ledger)
            .await
            .unwrap();
        assert_eq!(
            summary,
            TeardownSummary {
                deleted: 2,
                already_absent: 1,
                skipped: 2
            }
        );
        assert!(!tree.exists());
        assert!(queues.queue_urls().unwrap().is_empty());
        assert!(ledger.is_empty());
    }
}
