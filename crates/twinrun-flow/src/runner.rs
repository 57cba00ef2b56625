//! Run phases.
//!
//! [`ComparisonRun`] ties the pipeline components to one run's configuration
//! and workspace. Each phase reads what it needs from the run workspace, so
//! phases can execute in separate processes:
//!
//! | Phase | Reads | Writes |
//! |-------|-------|--------|
//! | deploy | configuration | ledger |
//! | trigger | ledger, item list | input queues |
//! | reduce | ledger, item list | (report) |
//! | cleanup | ledger | ledger |

use twinrun_core::config::RunConfig;
use twinrun_core::observability::run_span;
use twinrun_core::workspace::RunWorkspace;

use crate::artifact::ArtifactBuilder;
use crate::backend::Platform;
use crate::dispatch::{DispatchSummary, Dispatcher, QueueDescriptor};
use crate::drain::{Drain, DrainConfig, ReduceOutput};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::progress::ProgressSink;
use crate::provision::{ProvisionedRun, Provisioner};
use crate::teardown::{Teardown, TeardownSummary};
use tracing::Instrument;

/// Results of every phase of a full run.
#[derive(Debug, Default)]
pub struct FullRunReport {
    /// Provisioned pipelines, if deploy succeeded.
    pub provisioned: Option<ProvisionedRun>,
    /// Dispatch totals, if trigger succeeded.
    pub dispatch: Option<DispatchSummary>,
    /// Drain output, if reduce ran.
    pub reduce: Option<ReduceOutput>,
    /// Teardown totals, if cleanup succeeded.
    pub teardown: Option<TeardownSummary>,
    /// First error raised by deploy, trigger, reduce setup, or cleanup.
    /// Drain failures stay in [`ReduceOutput::result`].
    pub error: Option<Error>,
}

impl FullRunReport {
    /// Returns true if any phase failed, including the drain.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.reduce.as_ref().is_some_and(|r| r.result.is_err())
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        } else {
            tracing::error!(error = %error, "additional failure during full run");
        }
    }
}

/// One comparison run's phases.
pub struct ComparisonRun<'a> {
    config: &'a RunConfig,
    platform: &'a Platform,
    builder: &'a dyn ArtifactBuilder,
    progress: &'a dyn ProgressSink,
}

impl<'a> ComparisonRun<'a> {
    /// Creates the run.
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        platform: &'a Platform,
        builder: &'a dyn ArtifactBuilder,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            platform,
            builder,
            progress,
        }
    }

    /// Run workspace.
    #[must_use]
    pub fn workspace(&self) -> RunWorkspace {
        RunWorkspace::new(self.config.task_workspace())
    }

    fn load_ledger(&self) -> Result<Ledger> {
        Ledger::load(self.workspace().ledger_path())
    }

    /// Provisions both pipelines.
    ///
    /// Entries of an existing ledger are kept, so resources from an earlier
    /// deploy that was never cleaned up stay covered by cleanup.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::deploy`].
    pub async fn deploy(&self) -> Result<ProvisionedRun> {
        let span = run_span("deploy", self.config.task_id().as_str());
        async {
            let mut ledger = match self.load_ledger() {
                Ok(ledger) => {
                    if !ledger.is_empty() {
                        tracing::warn!(entries = ledger.len(), "ledger already lists resources; appending");
                    }
                    ledger
                }
                Err(e) if e.is_not_found() => Ledger::new(self.workspace().ledger_path()),
                Err(e) => return Err(e),
            };
            Provisioner::new(self.config, self.platform, self.builder, self.progress)
                .deploy(&mut ledger)
                .await
        }
        .instrument(span)
        .await
    }

    /// Sends the run's work items to both input queues.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger or item list cannot be read, or
    /// [`Error::Dispatch`] if a batch fails.
    pub async fn trigger(&self) -> Result<DispatchSummary> {
        let span = run_span("trigger", self.config.task_id().as_str());
        async {
            let ledger = self.load_ledger()?;
            let targets: Vec<QueueDescriptor> = ledger
                .input_queues(self.config.task_id())
                .into_iter()
                .map(QueueDescriptor::from_url)
                .collect();
            if targets.is_empty() {
                return Err(Error::configuration(format!(
                    "ledger {} lists no input queues; run deploy first",
                    ledger.path().display()
                )));
            }
            let items = self.workspace().read_item_ids()?;
            self.progress.phase(&format!(
                "Pushing {} work items to {} queues...",
                items.len(),
                targets.len()
            ));
            Dispatcher::new(self.platform.queues.as_ref(), self.progress)
                .dispatch(&items, &targets)
                .await
        }
        .instrument(span)
        .await
    }

    /// Drains the completion queue and compares paired results.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger or item list cannot be read. Drain
    /// failures are reported inside [`ReduceOutput::result`].
    pub async fn reduce(&self) -> Result<ReduceOutput> {
        let span = run_span("reduce", self.config.task_id().as_str());
        async {
            let ledger = self.load_ledger()?;
            let completion_queue = ledger.completion_queue(self.config.task_id())?.to_string();
            let items = self.workspace().read_item_ids()?;
            self.progress.phase(&format!("Collecting results for {} work items...", items.len()));
            let drain = Drain::new(
                self.platform.queues.as_ref(),
                self.platform.results.as_ref(),
                &completion_queue,
                DrainConfig::from_run_config(self.config),
                self.progress,
            );
            Ok(drain.reduce(items).await)
        }
        .instrument(span)
        .await
    }

    /// Deletes every resource in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or a deletion fails.
    pub async fn cleanup(&self) -> Result<TeardownSummary> {
        let span = run_span("cleanup", self.config.task_id().as_str());
        async {
            let path = self.workspace().ledger_path();
            self.progress
                .phase(&format!("Loading {} for deployed resources...", path.display()));
            let mut ledger = self.load_ledger()?;
            Teardown::new(self.platform, self.config.deploy().teardown_order, self.progress)
                .run(&mut ledger)
                .await
        }
        .instrument(span)
        .await
    }

    /// Runs deploy, trigger, reduce, and cleanup in sequence.
    ///
    /// Trigger and reduce are skipped when an earlier phase fails. Cleanup
    /// always runs, including after a failed deploy, since the ledger then
    /// lists the partially created resources.
    pub async fn all(&self) -> FullRunReport {
        let mut report = FullRunReport::default();

        match self.deploy().await {
            Ok(provisioned) => report.provisioned = Some(provisioned),
            Err(e) => report.fail(e),
        }

        if report.error.is_none() {
            match self.trigger().await {
                Ok(summary) => report.dispatch = Some(summary),
                Err(e) => report.fail(e),
            }
        }

        if report.error.is_none() {
            match self.reduce().await {
                Ok(output) => report.reduce = Some(output),
                Err(e) => report.fail(e),
            }
        }

        match self.cleanup().await {
            Ok(summary) => report.teardown = Some(summary),
            Err(e) => report.fail(e),
        }
        report
    }
}
