//! Command execution against the local backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use twinrun_cli::{run, Commands, Config, OutputFormat};
use twinrun_flow::backend::{QueueOptions, QueueService};
use twinrun_flow::ledger::{Ledger, ResourceKind};
use twinrun_test_utils::TestRun;

fn cli_config(run: &TestRun, format: OutputFormat) -> Config {
    let (deploy_config, task_config) = run.write_config_files();
    Config {
        deploy_config,
        task_config,
        format,
    }
}

#[tokio::test]
async fn cleanup_empties_ledger_written_by_earlier_process() {
    let test_run = TestRun::local("exp60");
    test_run.workspace().ensure().unwrap();
    let platform = test_run.platform();
    let queue = platform
        .queues
        .create_queue("exp60_benchmark", &QueueOptions::default())
        .await
        .unwrap();
    let package = test_run.workspace().package_dir(twinrun_core::id::Variant::Benchmark);
    std::fs::create_dir_all(&package).unwrap();

    let mut ledger = Ledger::new(test_run.workspace().ledger_path());
    ledger.record(ResourceKind::LocalArtifact, package.display().to_string());
    ledger.record(ResourceKind::Queue, queue.url.clone());
    ledger.persist().unwrap();

    run(Commands::Cleanup, &cli_config(&test_run, OutputFormat::Json))
        .await
        .unwrap();

    assert!(Ledger::load(test_run.workspace().ledger_path()).unwrap().is_empty());
    assert!(!package.exists());
    assert!(test_run.platform().queues.find_queues("exp60_benchmark").await.unwrap().is_empty());
}

#[tokio::test]
async fn trigger_before_deploy_fails_with_context() {
    let test_run = TestRun::local("exp61");
    test_run.write_items(3);

    let err = run(Commands::Trigger, &cli_config(&test_run, OutputFormat::Text))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Failed to push work items"));
}

#[tokio::test]
async fn reduce_before_deploy_fails() {
    let test_run = TestRun::local("exp62");
    test_run.write_items(3);

    let err = run(Commands::Reduce, &cli_config(&test_run, OutputFormat::Text))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Failed to start result collection"));
}
