//! Partition Assigner
//!
//! A pure function of (live instance set, partition count): partitions are
//! fixed buckets handed out round-robin over the sorted instance ids, and
//! the whole map is recomputed on every rebalance trigger. No ring, no
//! incremental state; churn on membership change is accepted in exchange
//! for determinism.

use crate::ownership::{InstanceHealth, Liveness};
use chrono::{DateTime, Utc};
use faro_shared::{InstanceId, PartitionId};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct PartitionAssigner {
    partition_count: u32,
    liveness_timeout: chrono::Duration,
}

impl PartitionAssigner {
    pub fn new(partition_count: u32, liveness_timeout: chrono::Duration) -> Self {
        Self {
            partition_count,
            liveness_timeout,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Instances considered alive at `now`, sorted and deduplicated.
    /// Sorting is what makes the assignment identical on every instance
    /// computing it independently.
    pub fn live_instances(
        &self,
        healths: &[InstanceHealth],
        now: DateTime<Utc>,
    ) -> Vec<InstanceId> {
        let mut live: Vec<InstanceId> = healths
            .iter()
            .filter(|h| h.liveness(now, self.liveness_timeout) == Liveness::Active)
            .map(|h| h.instance)
            .collect();
        live.sort();
        live.dedup();
        live
    }

    /// Deterministic, fair distribution: partition `p` goes to instance
    /// `p mod live.len()`. Empty input produces an empty map (nothing is
    /// dispatchable until someone heartbeats).
    pub fn compute(&self, live: &[InstanceId]) -> BTreeMap<PartitionId, InstanceId> {
        let mut assignments = BTreeMap::new();
        if live.is_empty() {
            return assignments;
        }
        for p in 0..self.partition_count {
            let owner = live[(p as usize) % live.len()];
            assignments.insert(PartitionId(p), owner);
        }
        assignments
    }

    /// The partitions `instance` should own under the current live set.
    pub fn partitions_for(&self, instance: InstanceId, live: &[InstanceId]) -> Vec<PartitionId> {
        self.compute(live)
            .into_iter()
            .filter(|(_, owner)| *owner == instance)
            .map(|(p, _)| p)
            .collect()
    }
}
