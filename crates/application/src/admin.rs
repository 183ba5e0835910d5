//! Administrative surface
//!
//! Operator-facing queries and commands: per-partition status (owner,
//! cursor, lag, dead letters), forced rebalance, and dead-letter draining.
//! Replay lives in [`crate::replay`].

use chrono::{DateTime, Utc};
use faro_domain::cursor::CursorStore;
use faro_domain::dead_letter::{DeadLetterEntry, DeadLetterFilter, DeadLetterSink};
use faro_domain::outbox::OutboxLog;
use faro_domain::ownership::OwnershipStore;
use faro_domain::shared_kernel::Result;
use faro_shared::{ConsumerId, FencingToken, InstanceId, PartitionId, RecordId};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// One partition as an operator sees it.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub partition: PartitionId,
    pub owner: Option<InstanceId>,
    pub fencing_token: Option<FencingToken>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Highest record id in the partition
    pub head: Option<RecordId>,
    /// Last dispatched id for the consumer
    pub cursor: RecordId,
    /// head − cursor; the growing-lag failure signal
    pub lag: i64,
    /// Records not yet dispatched
    pub pending: u64,
    /// Dead letters accumulated in this partition
    pub dead_letters: u64,
}

pub struct AdminApi {
    consumer: ConsumerId,
    partition_count: u32,
    log: Arc<dyn OutboxLog>,
    ownership: Arc<dyn OwnershipStore>,
    cursors: Arc<dyn CursorStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    rebalance: Arc<Notify>,
}

impl AdminApi {
    pub fn new(
        consumer: ConsumerId,
        partition_count: u32,
        log: Arc<dyn OutboxLog>,
        ownership: Arc<dyn OwnershipStore>,
        cursors: Arc<dyn CursorStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        rebalance: Arc<Notify>,
    ) -> Self {
        Self {
            consumer,
            partition_count,
            log,
            ownership,
            cursors,
            dead_letters,
            rebalance,
        }
    }

    /// Status of one partition, or of all of them.
    pub async fn status(&self, partition: Option<PartitionId>) -> Result<Vec<PartitionStatus>> {
        let partitions: Vec<PartitionId> = match partition {
            Some(p) => vec![p],
            None => (0..self.partition_count).map(PartitionId).collect(),
        };

        // Independent reads; gather them concurrently and re-order.
        let mut tasks = partitions
            .into_iter()
            .map(|p| self.partition_status(p))
            .collect::<FuturesUnordered<_>>();

        let mut statuses = Vec::new();
        while let Some(status) = tasks.next().await {
            statuses.push(status?);
        }
        statuses.sort_by_key(|s| s.partition);
        Ok(statuses)
    }

    async fn partition_status(&self, partition: PartitionId) -> Result<PartitionStatus> {
        let lease = self.ownership.lease_of(partition).await?;
        let head = self.log.head(partition).await?;
        let cursor = self.cursors.get(partition, &self.consumer).await?;
        let pending = self.log.pending_count(partition).await?;
        let dead_letters = self.dead_letters.count(Some(partition)).await?;

        let now = Utc::now();
        let valid_lease = lease.filter(|l| !l.is_expired(now));

        Ok(PartitionStatus {
            partition,
            owner: valid_lease.as_ref().map(|l| l.instance),
            fencing_token: valid_lease.as_ref().map(|l| l.fencing_token),
            lease_expires_at: valid_lease.as_ref().map(|l| l.expires_at),
            head,
            cursor,
            lag: head.map(|h| h.as_i64() - cursor.as_i64()).unwrap_or(0),
            pending,
            dead_letters,
        })
    }

    /// Force a reassignment pass on the local instance.
    pub fn rebalance(&self) {
        info!("Operator-forced rebalance");
        self.rebalance.notify_one();
    }

    /// Return and remove dead letters matching `filter`.
    pub async fn drain_dead_letters(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>> {
        let drained = self.dead_letters.drain(filter).await?;
        info!(count = drained.len(), "Dead letters drained");
        Ok(drained)
    }
}
