//! Teardown recovery: partial deploys, interrupted teardowns, and retries.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use twinrun_core::config::TeardownOrder;
use twinrun_flow::backend::Platform;
use twinrun_flow::error::{Error, ProvisionStep};
use twinrun_flow::ledger::{Ledger, ResourceKind};
use twinrun_flow::progress::NoProgress;
use twinrun_flow::runner::ComparisonRun;
use twinrun_flow::teardown::{Teardown, TeardownSummary};
use twinrun_test_utils::{
    BuildOp, ComputeOp, FaultyCompute, StubArtifactBuilder, TestRun,
};

#[tokio::test]
async fn failed_deploy_leaves_a_ledger_that_cleanup_empties() {
    let run = TestRun::memory("exp50");
    let platform = run.platform();
    let builder = StubArtifactBuilder::new();
    builder.fail_on(BuildOp::Package);
    let phases = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress);

    let err = phases.deploy().await.unwrap_err();
    assert!(
        matches!(err, Error::Provisioning { step: ProvisionStep::Package, .. }),
        "{err}"
    );

    // Completion queue plus the benchmark package recorded three times.
    let ledger = Ledger::load(run.workspace().ledger_path()).unwrap();
    let kinds: Vec<ResourceKind> = ledger.entries().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        [
            ResourceKind::Queue,
            ResourceKind::LocalArtifact,
            ResourceKind::LocalArtifact,
            ResourceKind::LocalArtifact,
        ]
    );

    let summary = phases.cleanup().await.unwrap();
    assert_eq!(
        summary,
        TeardownSummary {
            deleted: 2,
            already_absent: 2,
            skipped: 0,
        }
    );
    assert!(Ledger::load(run.workspace().ledger_path()).unwrap().is_empty());
}

#[tokio::test]
async fn full_run_cleans_up_after_failed_deploy() {
    let run = TestRun::memory("exp51");
    run.write_items(3);
    let platform = run.platform();
    let builder = StubArtifactBuilder::new();
    builder.fail_on(BuildOp::InstallDependencies);

    let report = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress)
        .all()
        .await;
    assert!(report.failed());
    assert!(matches!(
        report.error,
        Some(Error::Provisioning {
            step: ProvisionStep::InstallDependencies,
            ..
        })
    ));
    assert!(report.dispatch.is_none());
    assert!(report.reduce.is_none());
    assert_eq!(report.teardown.unwrap().total(), 5);
    assert!(platform.queues.find_queues("exp51").await.unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_teardown_resumes_with_remaining_entries() {
    let run = TestRun::memory("exp52");
    let base = run.platform();
    let compute = Arc::new(FaultyCompute::new(base.compute.clone()));
    let platform = Platform::new(base.queues.clone(), base.results.clone(), compute.clone());
    let builder = StubArtifactBuilder::new();
    let phases = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress);
    phases.deploy().await.unwrap();

    // The benchmark function deletes; the test function fails.
    compute.fail_after(ComputeOp::DeleteFunction, 1);
    let err = phases.cleanup().await.unwrap_err();
    assert!(
        matches!(err, Error::Teardown { kind: ResourceKind::ComputeFunction, .. }),
        "{err}"
    );

    let remaining = Ledger::load(run.workspace().ledger_path()).unwrap();
    let left: Vec<(ResourceKind, &str)> = remaining
        .entries()
        .map(|r| (r.kind, r.identifier.as_str()))
        .collect();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].0, ResourceKind::ComputeFunction);
    assert!(left[0].1.ends_with("exp52_test"));
    assert_eq!(left[1].0, ResourceKind::QueueBinding);

    compute.clear_failures();
    let summary = phases.cleanup().await.unwrap();
    assert_eq!(summary.deleted, 2);
    assert!(Ledger::load(run.workspace().ledger_path()).unwrap().is_empty());
}

#[tokio::test]
async fn reverse_order_stops_at_the_newest_failure() {
    let run = TestRun::memory("exp53");
    let base = run.platform();
    let compute = Arc::new(FaultyCompute::new(base.compute.clone()));
    let platform = Platform::new(base.queues.clone(), base.results.clone(), compute.clone());
    let builder = StubArtifactBuilder::new();
    ComparisonRun::new(&run.config, &platform, &builder, &NoProgress)
        .deploy()
        .await
        .unwrap();

    compute.fail_always(ComputeOp::DeleteBinding);
    let mut ledger = Ledger::load(run.workspace().ledger_path()).unwrap();
    let before = ledger.len();
    let teardown = Teardown::new(&platform, TeardownOrder::Reverse, &NoProgress);
    teardown.run(&mut ledger).await.unwrap_err();

    // Nothing was popped: the newest entry is the failing binding.
    assert_eq!(ledger.len(), before);
    assert_eq!(
        Ledger::load(run.workspace().ledger_path()).unwrap().len(),
        before
    );

    compute.clear_failures();
    let summary = teardown.run(&mut ledger).await.unwrap();
    assert_eq!(summary.total(), before);
}

#[tokio::test]
async fn repeated_cleanup_is_idempotent() {
    let run = TestRun::memory("exp54");
    let platform = run.platform();
    let builder = StubArtifactBuilder::new();
    let phases = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress);
    phases.deploy().await.unwrap();

    // A stale copy of the ledger replays deletions of resources already gone.
    let stale = std::fs::read(run.workspace().ledger_path()).unwrap();
    let first = phases.cleanup().await.unwrap();
    std::fs::write(run.workspace().ledger_path(), stale).unwrap();
    let second = phases.cleanup().await.unwrap();

    assert_eq!(first.total(), second.total());
    assert_eq!(second.deleted, 0);
    assert_eq!(second.already_absent + second.skipped, second.total());
}

#[tokio::test]
async fn redeploy_after_failure_dispatches_once_per_queue() {
    let run = TestRun::memory("exp55");
    run.write_items(3);
    let base = run.platform();
    let compute = Arc::new(FaultyCompute::new(base.compute.clone()));
    let platform = Platform::new(base.queues.clone(), base.results.clone(), compute.clone());
    let builder = StubArtifactBuilder::new();
    let phases = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress);

    // The benchmark input queue exists by the time its function fails.
    compute.fail_always(ComputeOp::CreateFunction);
    phases.deploy().await.unwrap_err();
    let partial = Ledger::load(run.workspace().ledger_path()).unwrap();
    assert_eq!(partial.input_queues(run.config.task_id()).len(), 1);

    compute.clear_failures();
    phases.deploy().await.unwrap();
    let ledger = Ledger::load(run.workspace().ledger_path()).unwrap();
    let queue_entries = ledger
        .entries()
        .filter(|r| r.kind == ResourceKind::Queue)
        .count();
    assert_eq!(queue_entries, 3);
    assert_eq!(ledger.input_queues(run.config.task_id()).len(), 2);

    let dispatch = phases.trigger().await.unwrap();
    assert_eq!(dispatch.queues, 2);
    assert_eq!(dispatch.batches_per_queue, 1);
    assert_eq!(dispatch.messages_sent, 6);

    phases.cleanup().await.unwrap();
    assert!(Ledger::load(run.workspace().ledger_path()).unwrap().is_empty());
    assert!(platform.queues.find_queues("exp55").await.unwrap().is_empty());
}
