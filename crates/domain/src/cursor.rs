//! Cursor Store Port
//!
//! Durable per-(partition, consumer) marker of the last successfully
//! dispatched record id. Advancement is a conditional write: it carries
//! the acting owner's fencing token, and the store rejects regressions and
//! stale tokens so two momentarily-overlapping owners cannot corrupt the
//! cursor during a rebalance race.

use crate::shared_kernel::Result;
use chrono::{DateTime, Utc};
use faro_shared::{ConsumerId, FencingToken, PartitionId, RecordId};
use serde::{Deserialize, Serialize};

/// Stored cursor row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub partition: PartitionId,
    pub consumer: ConsumerId,
    pub last_dispatched: RecordId,
    /// Token of the owner that last wrote this row
    pub fencing_token: FencingToken,
    pub updated_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Last dispatched id for `(partition, consumer)`; `RecordId::ZERO`
    /// when nothing has been dispatched yet.
    async fn get(&self, partition: PartitionId, consumer: &ConsumerId) -> Result<RecordId>;

    /// Full cursor row, if one exists.
    async fn find(&self, partition: PartitionId, consumer: &ConsumerId)
    -> Result<Option<Cursor>>;

    /// Conditionally advance the cursor.
    ///
    /// Accepted when `token` is at least the stored token AND `new_id` is
    /// at least the stored id (equal id is an idempotent no-op, which is
    /// what a post-crash redelivery produces). A lower token fails with
    /// `StaleFencingToken`; a lower id fails with `CursorRegression`.
    async fn advance(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
        new_id: RecordId,
        token: FencingToken,
    ) -> Result<()>;

    /// Replay reset: move the cursor to `to` unconditionally with respect
    /// to the id ordering. Only the replay controller calls this.
    async fn reset(&self, partition: PartitionId, consumer: &ConsumerId, to: RecordId)
    -> Result<()>;
}
