//! Replay integration tests: scoped cursor rewind, ordered re-delivery,
//! and the id-deduplication story for consumers.

mod common;

use common::{Harness, consumer, fast_settings, wait_for};
use faro_application::replay::{ReplayController, ReplayScope, ReplayTarget};
use faro_application::worker::PartitionWorker;
use faro_domain::cursor::CursorStore;
use faro_domain::ownership::OwnershipStore;
use faro_shared::{ConsumerId, InstanceId, PartitionId, RecordId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn run_partition_until(
    harness: &Harness,
    partition: PartitionId,
    target_deliveries: usize,
) {
    let instance = InstanceId::new();
    let lease = harness
        .ownership
        .acquire(
            partition,
            instance,
            chrono::Utc::now(),
            chrono::Duration::seconds(30),
        )
        .await
        .unwrap()
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let worker = PartitionWorker::new(
        lease.clone(),
        fast_settings(3),
        harness.log.clone(),
        harness.ownership.clone(),
        harness.cursors.clone(),
        harness.client.clone(),
        harness.sink.clone(),
        Arc::clone(&harness.metrics),
        rx,
    );
    let join = tokio::spawn(async move { worker.run().await.unwrap() });

    let client = harness.client.clone();
    assert!(
        wait_for(
            || client.delivered().len() >= target_deliveries,
            Duration::from_secs(5)
        )
        .await,
        "expected {target_deliveries} deliveries"
    );
    tx.send(true).unwrap();
    join.await.unwrap();
    harness.ownership.release(&lease).await.unwrap();
}

#[tokio::test]
async fn test_replay_to_beginning_redelivers_everything_in_order() {
    let harness = Harness::new(1);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(harness.append("stream-1", format!("event-{i}").as_bytes()).await);
    }

    run_partition_until(&harness, PartitionId(0), 5).await;
    assert_eq!(harness.client.delivered(), ids);

    // Operator rewinds the consumer; the next owner re-delivers all of it.
    let controller = ReplayController::new(harness.cursors.clone(), 1);
    let summary = controller
        .reset(
            ReplayScope::Partition(PartitionId(0)),
            &consumer(),
            ReplayTarget::Beginning,
        )
        .await
        .unwrap();
    assert_eq!(summary.partitions, vec![PartitionId(0)]);
    assert_eq!(summary.target, RecordId::ZERO);
    assert_eq!(
        harness.cursors.get(PartitionId(0), &consumer()).await.unwrap(),
        RecordId::ZERO
    );

    run_partition_until(&harness, PartitionId(0), 10).await;

    let delivered = harness.client.delivered();
    assert_eq!(delivered.len(), 10, "five originals plus five replayed duplicates");
    assert_eq!(&delivered[..5], &ids[..], "original pass in order");
    assert_eq!(&delivered[5..], &ids[..], "replay pass in order");

    // A consumer deduplicating on record id observes no net effect.
    let distinct: HashSet<RecordId> = delivered.into_iter().collect();
    assert_eq!(distinct.len(), 5);
}

#[tokio::test]
async fn test_replay_to_a_midpoint_redelivers_the_tail_only() {
    let harness = Harness::new(1);
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(harness.append("stream-1", format!("event-{i}").as_bytes()).await);
    }

    run_partition_until(&harness, PartitionId(0), 6).await;

    let controller = ReplayController::new(harness.cursors.clone(), 1);
    controller
        .reset(
            ReplayScope::Partition(PartitionId(0)),
            &consumer(),
            ReplayTarget::To(ids[2]),
        )
        .await
        .unwrap();

    run_partition_until(&harness, PartitionId(0), 9).await;

    let delivered = harness.client.delivered();
    assert_eq!(&delivered[6..], &ids[3..], "records after the target, in order");
}

#[tokio::test]
async fn test_replay_is_scoped_to_one_consumer() {
    let harness = Harness::new(4);
    let other = ConsumerId::new("proj-y");

    // Both consumers have cursors on partition 2.
    harness
        .cursors
        .advance(PartitionId(2), &consumer(), RecordId(40), faro_shared::FencingToken(1))
        .await
        .unwrap();
    harness
        .cursors
        .advance(PartitionId(2), &other, RecordId(40), faro_shared::FencingToken(1))
        .await
        .unwrap();

    let controller = ReplayController::new(harness.cursors.clone(), 4);
    controller
        .reset(
            ReplayScope::Partition(PartitionId(2)),
            &consumer(),
            ReplayTarget::Beginning,
        )
        .await
        .unwrap();

    assert_eq!(
        harness.cursors.get(PartitionId(2), &consumer()).await.unwrap(),
        RecordId::ZERO,
        "targeted consumer is rewound"
    );
    assert_eq!(
        harness.cursors.get(PartitionId(2), &other).await.unwrap(),
        RecordId(40),
        "unrelated consumer is untouched"
    );
}

#[tokio::test]
async fn test_replay_all_partitions_rewinds_every_cursor_of_the_consumer() {
    let harness = Harness::new(3);
    for p in 0..3 {
        harness
            .cursors
            .advance(
                PartitionId(p),
                &consumer(),
                RecordId(10 + p as i64),
                faro_shared::FencingToken(1),
            )
            .await
            .unwrap();
    }

    let controller = ReplayController::new(harness.cursors.clone(), 3);
    let summary = controller
        .reset(ReplayScope::AllPartitions, &consumer(), ReplayTarget::To(RecordId(5)))
        .await
        .unwrap();
    assert_eq!(summary.partitions.len(), 3);

    for p in 0..3 {
        assert_eq!(
            harness.cursors.get(PartitionId(p), &consumer()).await.unwrap(),
            RecordId(5)
        );
    }
}
