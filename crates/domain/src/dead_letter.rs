//! Dead-Letter Sink
//!
//! Records that exhaust their retry budget, or fail permanently, are
//! copied here and the partition cursor moves past them. Entries are never
//! auto-deleted; draining is an explicit operator action.

use crate::outbox::OutboxRecord;
use crate::shared_kernel::Result;
use chrono::{DateTime, Utc};
use faro_shared::{ConsumerId, PartitionId, PartitionKey, RecordId};
use serde::{Deserialize, Serialize};

/// A failed record preserved for manual remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub record_id: RecordId,
    pub partition: PartitionId,
    pub partition_key: PartitionKey,
    /// Consumer on whose behalf delivery was attempted
    pub consumer: ConsumerId,
    pub payload: Vec<u8>,
    pub failure_reason: String,
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn from_record(
        record: &OutboxRecord,
        consumer: &ConsumerId,
        failure_reason: impl Into<String>,
        attempt_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record.id,
            partition: record.partition,
            partition_key: record.partition_key.clone(),
            consumer: consumer.clone(),
            payload: record.payload.clone(),
            failure_reason: failure_reason.into(),
            attempt_count,
            last_attempt_at: now,
            dead_lettered_at: now,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Filter for the operator-facing drain.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    /// Restrict to one partition
    pub partition: Option<PartitionId>,
    /// Only entries dead-lettered before this instant
    pub before: Option<DateTime<Utc>>,
    /// Cap on the number of entries returned
    pub limit: Option<usize>,
}

#[async_trait::async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist one entry.
    async fn push(&self, entry: DeadLetterEntry) -> Result<()>;

    /// Return and remove entries matching `filter`. Entries not matched
    /// stay put; nothing expires on its own.
    async fn drain(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>>;

    /// Count entries, optionally scoped to one partition.
    async fn count(&self, partition: Option<PartitionId>) -> Result<u64>;
}
