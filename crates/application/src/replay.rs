//! Replay Controller
//!
//! Operator-driven cursor rewind. Replay is always scoped to one consumer
//! and either one partition or all of them — there is deliberately no way
//! to express "every consumer", so a backfill of one projection cannot
//! flood its neighbors.
//!
//! Precondition (enforced by housekeeping policy, not here): the outbox log
//! still retains records back to the target point.

use faro_domain::cursor::CursorStore;
use faro_domain::shared_kernel::Result;
use faro_shared::{ConsumerId, PartitionId, RecordId};
use std::sync::Arc;
use tracing::info;

/// Which partitions to rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayScope {
    Partition(PartitionId),
    AllPartitions,
}

/// Where to rewind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayTarget {
    /// Everything the log still retains
    Beginning,
    /// Records with `id > to` are re-delivered
    To(RecordId),
}

/// What a reset touched.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub consumer: ConsumerId,
    pub partitions: Vec<PartitionId>,
    pub target: RecordId,
}

pub struct ReplayController {
    cursors: Arc<dyn CursorStore>,
    partition_count: u32,
}

impl ReplayController {
    pub fn new(cursors: Arc<dyn CursorStore>, partition_count: u32) -> Self {
        Self {
            cursors,
            partition_count,
        }
    }

    /// Rewind `consumer`'s cursor(s). The next poll cycle of whichever
    /// instance owns each partition re-delivers from the target forward;
    /// consumers deduplicating on record id see no net effect for records
    /// they already processed.
    pub async fn reset(
        &self,
        scope: ReplayScope,
        consumer: &ConsumerId,
        target: ReplayTarget,
    ) -> Result<ReplaySummary> {
        let to = match target {
            ReplayTarget::Beginning => RecordId::ZERO,
            ReplayTarget::To(id) => id,
        };

        let partitions: Vec<PartitionId> = match scope {
            ReplayScope::Partition(p) => vec![p],
            ReplayScope::AllPartitions => (0..self.partition_count).map(PartitionId).collect(),
        };

        for partition in &partitions {
            self.cursors.reset(*partition, consumer, to).await?;
        }

        info!(
            consumer = %consumer,
            partitions = partitions.len(),
            target = %to,
            "Replay reset applied"
        );

        Ok(ReplaySummary {
            consumer: consumer.clone(),
            partitions,
            target: to,
        })
    }
}
