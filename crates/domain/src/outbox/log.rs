//! Outbox Log Port
//!
//! Abstraction over the durable, insertion-ordered collection of outbox
//! records. Any transactional store works; the PostgreSQL and in-memory
//! implementations live in `faro-infrastructure`.

use crate::outbox::OutboxRecord;
use crate::shared_kernel::Result;
use chrono::{DateTime, Utc};
use faro_shared::{PartitionId, PartitionKey, RecordId};

/// Durable, append-only log of pending deliveries.
///
/// `append` runs inside the business transaction; every other operation is
/// called by the dispatcher side. Ids are assigned by the log at insertion
/// time, so id order within a partition equals insertion order.
#[async_trait::async_trait]
pub trait OutboxLog: Send + Sync {
    /// Append a record for `key`, returning the assigned id.
    ///
    /// The implementation computes the record's partition from the key, so
    /// writers never choose (or get wrong) the bucket themselves.
    async fn append(&self, key: &PartitionKey, payload: &[u8]) -> Result<RecordId>;

    /// Read up to `limit` records of `partition` with `id > after`,
    /// ordered by id ascending.
    ///
    /// Dispatched records are included: replay rewinds a cursor below them
    /// and expects to see them again.
    async fn read_from(
        &self,
        partition: PartitionId,
        after: RecordId,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>>;

    /// Highest id present in `partition`, if any. Lag = head − cursor.
    async fn head(&self, partition: PartitionId) -> Result<Option<RecordId>>;

    /// Confirm delivery: set `dispatched_at`. Idempotent.
    async fn mark_dispatched(&self, id: RecordId, at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt: bump `attempt_count`, store the error and
    /// the earliest time of the next attempt.
    async fn record_attempt(
        &self,
        id: RecordId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Records in `partition` not yet dispatched.
    async fn pending_count(&self, partition: PartitionId) -> Result<u64>;

    /// Retention sweep: physically delete dispatched records older than
    /// `older_than`. Driven by external housekeeping, never by workers.
    async fn cleanup_dispatched(&self, older_than: std::time::Duration) -> Result<u64>;

    /// Fetch one record by id.
    async fn find_by_id(&self, id: RecordId) -> Result<Option<OutboxRecord>>;
}
