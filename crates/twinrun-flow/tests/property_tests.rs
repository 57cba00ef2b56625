//! Property-based tests for twinrun-flow invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tokio_test::block_on;

use twinrun_core::id::{ItemId, ResultId, Variant};
use twinrun_flow::backend::memory::InMemoryQueueService;
use twinrun_flow::backend::{QueueOptions, QueueService, MAX_BATCH_SIZE};
use twinrun_flow::compare::{diff, flatten, DiffValue};
use twinrun_flow::dispatch::{Dispatcher, QueueDescriptor, MESSAGE_GROUP};
use twinrun_flow::drain::{Correlator, Observation};
use twinrun_flow::ledger::{Ledger, ResourceKind};
use twinrun_flow::progress::NoProgress;
use twinrun_flow::record::ResultRecord;

const KINDS: [ResourceKind; 6] = [
    ResourceKind::LocalArtifact,
    ResourceKind::SharedMount,
    ResourceKind::Queue,
    ResourceKind::ComputeFunction,
    ResourceKind::QueueBinding,
    ResourceKind::DataTable,
];

/// Generates a nested payload of objects with numeric, string, and array leaves.
fn arb_payload() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        (-1_000i64..1_000).prop_map(|n| json!(n)),
        (-1_000.0f64..1_000.0).prop_map(|f| json!(f)),
        "[a-z]{0,6}".prop_map(Value::String),
        prop::collection::vec(0i64..10, 0..3).prop_map(|v| json!(v)),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-e]", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>()))
    })
    .prop_map(|v| match v {
        Value::Object(_) => v,
        leaf => json!({ "root": leaf }),
    })
}

proptest! {
    /// Every queue receives each item exactly once, in order, in batches of at most ten.
    #[test]
    fn dispatch_batches_preserve_items(n in 0usize..64, ordered in any::<bool>()) {
        let queues = InMemoryQueueService::new();
        let items: Vec<ItemId> = (0..n).map(|i| ItemId::new(format!("item-{i}"))).collect();

        let (summary, plain, fifo) = block_on(async {
            let plain = queues.create_queue("exp_benchmark", &QueueOptions::default()).await.unwrap();
            let options = if ordered { QueueOptions::ordered() } else { QueueOptions::default() };
            let fifo = queues.create_queue("exp_test", &options).await.unwrap();
            let targets = [QueueDescriptor::from_url(&plain.url), QueueDescriptor::from_url(&fifo.url)];
            let summary = Dispatcher::new(&queues, &NoProgress)
                .dispatch(&items, &targets)
                .await
                .unwrap();
            (summary, plain, fifo)
        });

        prop_assert_eq!(summary.batches_per_queue, n.div_ceil(MAX_BATCH_SIZE));
        prop_assert_eq!(summary.messages_sent, 2 * n);
        for url in [&plain.url, &fifo.url] {
            let batches = queues.sent_batches(url).unwrap();
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_BATCH_SIZE));
            let bodies: Vec<String> = batches.iter().flatten().map(|m| m.body.clone()).collect();
            let expected: Vec<String> = items.iter().map(|i| i.as_str().to_string()).collect();
            prop_assert_eq!(bodies, expected);
        }
        let fifo_batches = queues.sent_batches(&fifo.url).unwrap();
        prop_assert!(fifo_batches
            .iter()
            .flatten()
            .all(|m| m.group_id.as_deref() == ordered.then_some(MESSAGE_GROUP)));
    }

    /// A persisted ledger loads back with the same entries in the same order.
    #[test]
    fn ledger_roundtrip_preserves_entries(
        entries in prop::collection::vec((0usize..KINDS.len(), "[a-zA-Z0-9:/._-]{1,40}"), 0..40)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployed_list.json");
        let mut ledger = Ledger::new(&path);
        for (kind, id) in &entries {
            ledger.record(KINDS[*kind], id.clone());
        }
        ledger.persist().unwrap();

        let loaded = Ledger::load(&path).unwrap();
        let got: Vec<(ResourceKind, String)> = loaded
            .entries()
            .map(|r| (r.kind, r.identifier.clone()))
            .collect();
        let want: Vec<(ResourceKind, String)> = entries
            .iter()
            .map(|(kind, id)| (KINDS[*kind], id.clone()))
            .collect();
        prop_assert_eq!(got, want);
    }

    /// Comparing a payload with itself finds no differences.
    #[test]
    fn identical_payloads_have_no_diff(payload in arb_payload()) {
        prop_assert!(diff(&payload, &payload).is_empty());
    }

    /// Swapping the sides mirrors added and deleted paths and negates deltas.
    #[test]
    fn diff_is_antisymmetric(a in arb_payload(), b in arb_payload()) {
        let forward = diff(&a, &b);
        let backward = diff(&b, &a);
        prop_assert_eq!(forward.len(), backward.len());
        for (path, entry) in &forward {
            let mirrored = &backward[path];
            match entry {
                DiffValue::Added => prop_assert_eq!(mirrored, &DiffValue::Deleted),
                DiffValue::Deleted => prop_assert_eq!(mirrored, &DiffValue::Added),
                DiffValue::Delta(d) => prop_assert_eq!(mirrored, &DiffValue::Delta(-d)),
                DiffValue::Changed { benchmark, test } => prop_assert_eq!(
                    mirrored,
                    &DiffValue::Changed { benchmark: test.clone(), test: benchmark.clone() }
                ),
            }
        }
        // Every reported path exists on at least one side.
        let paths_a = flatten(&a);
        let paths_b = flatten(&b);
        prop_assert!(forward.keys().all(|p| paths_a.contains_key(p) || paths_b.contains_key(p)));
    }

    /// Pairing does not depend on arrival order or redelivery.
    #[test]
    fn correlation_is_order_independent(
        n in 1usize..20,
        order in any::<u64>(),
        redeliveries in 0usize..10,
    ) {
        let items: Vec<ItemId> = (0..n).map(|i| ItemId::new(format!("item-{i}"))).collect();
        let mut records: Vec<ResultRecord> = items
            .iter()
            .flat_map(|item| {
                Variant::ALL.into_iter().map(move |variant| {
                    ResultRecord::new(
                        ResultId::new(format!("{item}-{variant}")),
                        item.clone(),
                        variant,
                        json!({"v": 1}),
                    )
                })
            })
            .collect();
        for i in 0..redeliveries {
            let copy = records[i % records.len()].clone();
            records.push(copy);
        }
        // Deterministic shuffle driven by the generated seed.
        let mut seed = order;
        for i in (1..records.len()).rev() {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = usize::try_from(seed >> 33).unwrap() % (i + 1);
            records.swap(i, j);
        }

        let mut correlator = Correlator::new(items.clone());
        let completed = records
            .into_iter()
            .filter(|r| matches!(correlator.observe(r.clone()), Observation::Completed { .. }))
            .count();
        prop_assert_eq!(completed, n);
        prop_assert!(correlator.is_done());
    }
}
