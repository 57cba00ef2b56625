//! Drain behavior under at-least-once delivery.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use twinrun_core::id::{ItemId, ResultId, Variant};
use twinrun_flow::backend::memory::{InMemoryQueueService, InMemoryResultStore};
use twinrun_flow::backend::{QueueOptions, QueueService, ResultStore};
use twinrun_flow::drain::{Drain, DrainConfig, DrainOutcome};
use twinrun_flow::error::{Error, Result};
use twinrun_flow::progress::NoProgress;
use twinrun_flow::record::ResultRecord;
use twinrun_flow::runner::ComparisonRun;
use twinrun_test_utils::{FaultyQueueService, QueueOp, SimulatedWorker, StubArtifactBuilder, TestRun};

const TABLE: &str = "results";

fn config(visibility_secs: u64) -> DrainConfig {
    DrainConfig {
        table: TABLE.into(),
        idle_threshold: Duration::from_secs(20),
        poll_interval: Duration::from_secs(1),
        visibility_timeout: Duration::from_secs(visibility_secs),
        refetch_delay: Duration::from_millis(100),
    }
}

async fn seed_pair(store: &InMemoryResultStore, queues: &InMemoryQueueService, url: &str, item: &str) {
    for variant in Variant::ALL {
        let id = format!("{item}-{variant}");
        store
            .put(
                TABLE,
                ResultRecord::new(ResultId::new(&id), ItemId::new(item), variant, json!({"v": 1})),
            )
            .await
            .unwrap();
        queues.push(url, id).unwrap();
    }
}

/// Result store that hides selected records from the first lookup.
struct LateStore {
    inner: InMemoryResultStore,
    hidden: Mutex<HashSet<ResultId>>,
}

#[async_trait]
impl ResultStore for LateStore {
    async fn batch_get(&self, table: &str, keys: &[ResultId]) -> Result<Vec<ResultRecord>> {
        let mut records = self.inner.batch_get(table, keys).await?;
        let mut hidden = self.hidden.lock().unwrap();
        records.retain(|r| !hidden.remove(&r.result_id));
        Ok(records)
    }

    async fn put(&self, table: &str, record: ResultRecord) -> Result<()> {
        self.inner.put(table, record).await
    }
}

#[tokio::test]
async fn duplicate_signals_are_ignored() {
    let run = TestRun::memory("exp60");
    run.write_items(5);
    let platform = run.platform();
    let builder = StubArtifactBuilder::new();
    let phases = ComparisonRun::new(&run.config, &platform, &builder, &NoProgress);
    phases.deploy().await.unwrap();
    phases.trigger().await.unwrap();
    for variant in Variant::ALL {
        SimulatedWorker::new(&run.config, &platform, variant)
            .with_duplicate_signals()
            .process_all()
            .await
            .unwrap();
    }

    let output = phases.reduce().await.unwrap();
    assert_eq!(output.result.unwrap(), DrainOutcome::Completed);
    assert_eq!(output.diff.cases_seen, 5);
    assert_eq!(output.stats.signals, 20);
    assert_eq!(output.stats.ignored, 10);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_signals_are_redelivered_to_the_next_drain() {
    let queues = InMemoryQueueService::new();
    let store = InMemoryResultStore::new();
    let q = queues.create_queue("exp61_completion", &QueueOptions::default()).await.unwrap();
    seed_pair(&store, &queues, &q.url, "a").await;
    seed_pair(&store, &queues, &q.url, "b").await;

    let faulty = FaultyQueueService::new(Arc::new(queues));
    faulty.fail_times(QueueOp::Delete, 1);
    let items = || vec![ItemId::new("a"), ItemId::new("b")];

    let first = Drain::new(&faulty, &store, &q.url, config(5), &NoProgress)
        .reduce(items())
        .await;
    assert!(matches!(first.result, Err(Error::Transport { operation: "delete_batch", .. })));
    // Pairs compared before the failed acknowledgement are still reported.
    assert_eq!(first.diff.cases_seen, 2);

    let second = Drain::new(&faulty, &store, &q.url, config(5), &NoProgress)
        .reduce(items())
        .await;
    assert_eq!(second.result.unwrap(), DrainOutcome::Completed);
    assert_eq!(second.diff.cases_seen, 2);
    assert!(second.elapsed >= Duration::from_secs(5));
    assert!(faulty.receive(&q.url, 10, Duration::from_secs(1)).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_records_are_fetched_again_and_missing_ones_acknowledged() {
    let queues = InMemoryQueueService::new();
    let store = LateStore {
        inner: InMemoryResultStore::new(),
        hidden: Mutex::new(HashSet::from([ResultId::new("a-test")])),
    };
    let q = queues.create_queue("exp62_completion", &QueueOptions::default()).await.unwrap();
    seed_pair(&store.inner, &queues, &q.url, "a").await;
    queues.push(&q.url, "ghost").unwrap();

    let output = Drain::new(&queues, &store, &q.url, config(30), &NoProgress)
        .reduce(vec![ItemId::new("a")])
        .await;
    assert_eq!(output.result.unwrap(), DrainOutcome::Completed);
    assert_eq!(output.diff.cases_seen, 1);
    assert_eq!(output.stats.missing, 1);
    assert_eq!(queues.visible_len(&q.url).unwrap(), 0);
    assert_eq!(queues.in_flight_len(&q.url).unwrap(), 0);
}
