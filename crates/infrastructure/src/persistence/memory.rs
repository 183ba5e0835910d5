//! In-memory implementations of the storage ports.
//!
//! Used by the test suite and by embedded single-process deployments. The
//! semantics match the PostgreSQL adapters exactly: conditional writes,
//! fencing-token bumps on ownership change, regression-rejecting cursor
//! advancement.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use faro_domain::cursor::{Cursor, CursorStore};
use faro_domain::dead_letter::{DeadLetterEntry, DeadLetterFilter, DeadLetterSink};
use faro_domain::outbox::{OutboxLog, OutboxRecord};
use faro_domain::ownership::{InstanceHealth, OwnershipLease, OwnershipStore};
use faro_domain::partition::Partitioner;
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::{ConsumerId, FencingToken, InstanceId, PartitionId, PartitionKey, RecordId};
use std::sync::Mutex;

/// In-memory outbox log.
///
/// Ids are handed out by a counter under the same lock as the insert, so
/// id order equals insertion order, exactly like a BIGSERIAL column.
pub struct InMemoryOutboxLog {
    partitioner: Partitioner,
    inner: Mutex<LogInner>,
}

struct LogInner {
    next_id: i64,
    records: Vec<OutboxRecord>,
}

impl InMemoryOutboxLog {
    pub fn new(partitioner: Partitioner) -> Self {
        Self {
            partitioner,
            inner: Mutex::new(LogInner {
                next_id: 1,
                records: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        // A poisoned lock means a panicked writer; the log is corrupt either way.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl OutboxLog for InMemoryOutboxLog {
    async fn append(&self, key: &PartitionKey, payload: &[u8]) -> Result<RecordId> {
        let mut inner = self.lock();
        let id = RecordId(inner.next_id);
        inner.next_id += 1;
        let record = OutboxRecord {
            id,
            partition: self.partitioner.partition_for(key),
            partition_key: key.clone(),
            payload: payload.to_vec(),
            created_at: Utc::now(),
            dispatched_at: None,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
        };
        inner.records.push(record);
        Ok(id)
    }

    async fn read_from(
        &self,
        partition: PartitionId,
        after: RecordId,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| r.partition == partition && r.id > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn head(&self, partition: PartitionId) -> Result<Option<RecordId>> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| r.partition == partition)
            .map(|r| r.id)
            .max())
    }

    async fn mark_dispatched(&self, id: RecordId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RecordNotFound(id))?;
        if record.dispatched_at.is_none() {
            record.dispatched_at = Some(at);
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        id: RecordId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RecordNotFound(id))?;
        record.attempt_count += 1;
        record.last_error = Some(error.to_string());
        record.next_attempt_at = Some(next_attempt_at);
        Ok(())
    }

    async fn pending_count(&self, partition: PartitionId) -> Result<u64> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| r.partition == partition && !r.is_dispatched())
            .count() as u64)
    }

    async fn cleanup_dispatched(&self, older_than: std::time::Duration) -> Result<u64> {
        let threshold = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut inner = self.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|r| !(matches!(r.dispatched_at, Some(at) if at < threshold)));
        Ok((before - inner.records.len()) as u64)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<OutboxRecord>> {
        let inner = self.lock();
        Ok(inner.records.iter().find(|r| r.id == id).cloned())
    }
}

/// In-memory ownership table.
pub struct InMemoryOwnershipStore {
    instances: DashMap<InstanceId, DateTime<Utc>>,
    leases: DashMap<PartitionId, OwnershipLease>,
}

impl InMemoryOwnershipStore {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            leases: DashMap::new(),
        }
    }
}

impl Default for InMemoryOwnershipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OwnershipStore for InMemoryOwnershipStore {
    async fn heartbeat(&self, instance: InstanceId, now: DateTime<Utc>) -> Result<()> {
        self.instances.insert(instance, now);
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceHealth>> {
        Ok(self
            .instances
            .iter()
            .map(|e| InstanceHealth {
                instance: *e.key(),
                last_heartbeat_at: *e.value(),
            })
            .collect())
    }

    async fn deregister(&self, instance: InstanceId) -> Result<()> {
        self.instances.remove(&instance);
        Ok(())
    }

    async fn acquire(
        &self,
        partition: PartitionId,
        instance: InstanceId,
        now: DateTime<Utc>,
        lease_duration: chrono::Duration,
    ) -> Result<Option<OwnershipLease>> {
        let expires_at = now + lease_duration;
        // The entry lock makes check-and-set atomic per partition.
        let mut entry = self.leases.entry(partition).or_insert_with(|| OwnershipLease {
            partition,
            instance,
            fencing_token: FencingToken::INITIAL,
            expires_at,
        });
        let current = entry.value_mut();

        if current.instance == instance && !current.is_expired(now) {
            // Renewal keeps the token.
            current.expires_at = expires_at;
            return Ok(Some(current.clone()));
        }
        if current.is_expired(now) {
            // Takeover (or re-acquire after expiry): ownership changes
            // hands, the token bumps.
            current.instance = instance;
            current.fencing_token = current.fencing_token.next();
            current.expires_at = expires_at;
            return Ok(Some(current.clone()));
        }
        Ok(None)
    }

    async fn release(&self, lease: &OwnershipLease) -> Result<()> {
        if let Some(mut entry) = self.leases.get_mut(&lease.partition) {
            if entry.fencing_token == lease.fencing_token && entry.instance == lease.instance {
                // Expire in place; the row (and its token history) survives.
                entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
            }
        }
        Ok(())
    }

    async fn lease_of(&self, partition: PartitionId) -> Result<Option<OwnershipLease>> {
        Ok(self.leases.get(&partition).map(|e| e.clone()))
    }
}

/// In-memory cursor store with the same conditional-write contract as the
/// PostgreSQL adapter.
pub struct InMemoryCursorStore {
    cursors: DashMap<(PartitionId, ConsumerId), Cursor>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, partition: PartitionId, consumer: &ConsumerId) -> Result<RecordId> {
        Ok(self
            .cursors
            .get(&(partition, consumer.clone()))
            .map(|c| c.last_dispatched)
            .unwrap_or(RecordId::ZERO))
    }

    async fn find(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
    ) -> Result<Option<Cursor>> {
        Ok(self
            .cursors
            .get(&(partition, consumer.clone()))
            .map(|c| c.clone()))
    }

    async fn advance(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
        new_id: RecordId,
        token: FencingToken,
    ) -> Result<()> {
        let mut entry = self
            .cursors
            .entry((partition, consumer.clone()))
            .or_insert_with(|| Cursor {
                partition,
                consumer: consumer.clone(),
                last_dispatched: RecordId::ZERO,
                fencing_token: FencingToken(0),
                updated_at: Utc::now(),
            });
        let cursor = entry.value_mut();

        if token < cursor.fencing_token {
            return Err(DispatchError::StaleFencingToken {
                partition,
                presented: token,
                current: cursor.fencing_token,
            });
        }
        if new_id < cursor.last_dispatched {
            return Err(DispatchError::CursorRegression {
                partition,
                consumer: consumer.clone(),
                stored: cursor.last_dispatched,
                attempted: new_id,
            });
        }
        cursor.last_dispatched = new_id;
        cursor.fencing_token = token;
        cursor.updated_at = Utc::now();
        Ok(())
    }

    async fn reset(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
        to: RecordId,
    ) -> Result<()> {
        let mut entry = self
            .cursors
            .entry((partition, consumer.clone()))
            .or_insert_with(|| Cursor {
                partition,
                consumer: consumer.clone(),
                last_dispatched: RecordId::ZERO,
                fencing_token: FencingToken(0),
                updated_at: Utc::now(),
            });
        let cursor = entry.value_mut();
        cursor.last_dispatched = to;
        cursor.updated_at = Utc::now();
        Ok(())
    }

}

/// In-memory dead-letter sink.
pub struct InMemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryDeadLetterSink {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(entry: &DeadLetterEntry, filter: &DeadLetterFilter) -> bool {
    if let Some(p) = filter.partition {
        if entry.partition != p {
            return false;
        }
    }
    if let Some(before) = filter.before {
        if entry.dead_lettered_at >= before {
            return false;
        }
    }
    true
}

#[async_trait::async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn push(&self, entry: DeadLetterEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
        Ok(())
    }

    async fn drain(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut drained = Vec::new();
        let mut kept = Vec::new();
        for entry in entries.drain(..) {
            if drained.len() < limit && matches_filter(&entry, filter) {
                drained.push(entry);
            } else {
                kept.push(entry);
            }
        }
        *entries = kept;
        Ok(drained)
    }

    async fn count(&self, partition: Option<PartitionId>) -> Result<u64> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|e| partition.is_none_or(|p| e.partition == p))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PartitionKey {
        PartitionKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let log = InMemoryOutboxLog::new(Partitioner::new(4));
        let a = log.append(&key("s1"), b"one").await.unwrap();
        let b = log.append(&key("s1"), b"two").await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_read_from_is_ordered_and_filtered() {
        let log = InMemoryOutboxLog::new(Partitioner::new(1));
        for i in 0..5 {
            log.append(&key("s"), format!("{i}").as_bytes())
                .await
                .unwrap();
        }
        let records = log
            .read_from(PartitionId(0), RecordId(2), 10)
            .await
            .unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id.as_i64()).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_read_from_includes_dispatched_records() {
        let log = InMemoryOutboxLog::new(Partitioner::new(1));
        let id = log.append(&key("s"), b"x").await.unwrap();
        log.mark_dispatched(id, Utc::now()).await.unwrap();
        let records = log
            .read_from(PartitionId(0), RecordId::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1, "replay needs dispatched records too");
    }

    #[tokio::test]
    async fn test_cleanup_dispatched_respects_retention() {
        let log = InMemoryOutboxLog::new(Partitioner::new(1));
        let old = log.append(&key("s"), b"old").await.unwrap();
        let fresh = log.append(&key("s"), b"fresh").await.unwrap();
        let pending = log.append(&key("s"), b"pending").await.unwrap();

        log.mark_dispatched(old, Utc::now() - chrono::Duration::days(10))
            .await
            .unwrap();
        log.mark_dispatched(fresh, Utc::now()).await.unwrap();

        let deleted = log
            .cleanup_dispatched(std::time::Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(deleted, 1, "only the old dispatched record goes");
        assert!(log.find_by_id(old).await.unwrap().is_none());
        assert!(log.find_by_id(fresh).await.unwrap().is_some());
        assert!(log.find_by_id(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_attempt_tracks_retry_state() {
        let log = InMemoryOutboxLog::new(Partitioner::new(1));
        let id = log.append(&key("s"), b"x").await.unwrap();
        let next = Utc::now() + chrono::Duration::seconds(5);
        log.record_attempt(id, "timeout", next).await.unwrap();
        let record = log.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
        assert_eq!(record.next_attempt_at, Some(next));
    }

    #[tokio::test]
    async fn test_acquire_bumps_token_on_takeover_only() {
        let store = InMemoryOwnershipStore::new();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let now = Utc::now();
        let dur = chrono::Duration::seconds(30);
        let p = PartitionId(0);

        let lease_a = store.acquire(p, a, now, dur).await.unwrap().unwrap();
        assert_eq!(lease_a.fencing_token, FencingToken::INITIAL);

        // Renewal by the holder keeps the token.
        let renewed = store
            .acquire(p, a, now + chrono::Duration::seconds(10), dur)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renewed.fencing_token, lease_a.fencing_token);

        // A competitor is refused while the lease is valid.
        assert!(store.acquire(p, b, now, dur).await.unwrap().is_none());

        // After expiry the competitor takes over with a bumped token.
        let later = now + chrono::Duration::seconds(60);
        let lease_b = store.acquire(p, b, later, dur).await.unwrap().unwrap();
        assert_eq!(lease_b.fencing_token, lease_a.fencing_token.next());
    }

    #[tokio::test]
    async fn test_release_lets_next_acquire_proceed() {
        let store = InMemoryOwnershipStore::new();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let now = Utc::now();
        let dur = chrono::Duration::seconds(30);
        let p = PartitionId(3);

        let lease_a = store.acquire(p, a, now, dur).await.unwrap().unwrap();
        store.release(&lease_a).await.unwrap();

        let lease_b = store.acquire(p, b, now, dur).await.unwrap().unwrap();
        assert!(lease_b.fencing_token > lease_a.fencing_token);
    }

    #[tokio::test]
    async fn test_stale_release_is_a_noop() {
        let store = InMemoryOwnershipStore::new();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let now = Utc::now();
        let dur = chrono::Duration::seconds(30);
        let p = PartitionId(0);

        let lease_a = store.acquire(p, a, now, dur).await.unwrap().unwrap();
        let later = now + chrono::Duration::seconds(60);
        let lease_b = store.acquire(p, b, later, dur).await.unwrap().unwrap();

        // The ex-owner's release must not expire the new owner's lease.
        store.release(&lease_a).await.unwrap();
        let current = store.lease_of(p).await.unwrap().unwrap();
        assert_eq!(current.fencing_token, lease_b.fencing_token);
        assert!(!current.is_expired(later));
    }

    #[tokio::test]
    async fn test_cursor_defaults_to_zero() {
        let store = InMemoryCursorStore::new();
        let consumer = ConsumerId::new("proj-x");
        let id = store.get(PartitionId(0), &consumer).await.unwrap();
        assert_eq!(id, RecordId::ZERO);
        assert!(store.find(PartitionId(0), &consumer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_advance_rejects_regression() {
        let store = InMemoryCursorStore::new();
        let consumer = ConsumerId::new("proj-x");
        let p = PartitionId(1);
        let token = FencingToken::INITIAL;

        store.advance(p, &consumer, RecordId(10), token).await.unwrap();
        let err = store
            .advance(p, &consumer, RecordId(9), token)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::CursorRegression { .. }));

        // Equal id is idempotent, not a regression.
        store.advance(p, &consumer, RecordId(10), token).await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_advance_rejects_stale_token() {
        let store = InMemoryCursorStore::new();
        let consumer = ConsumerId::new("proj-x");
        let p = PartitionId(1);

        store
            .advance(p, &consumer, RecordId(10), FencingToken(2))
            .await
            .unwrap();
        let err = store
            .advance(p, &consumer, RecordId(11), FencingToken(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleFencingToken { .. }));
    }

    #[tokio::test]
    async fn test_cursor_reset_moves_backwards() {
        let store = InMemoryCursorStore::new();
        let consumer = ConsumerId::new("proj-x");
        let p = PartitionId(2);

        store
            .advance(p, &consumer, RecordId(100), FencingToken(1))
            .await
            .unwrap();
        store.reset(p, &consumer, RecordId::ZERO).await.unwrap();
        assert_eq!(store.get(p, &consumer).await.unwrap(), RecordId::ZERO);
    }

    #[tokio::test]
    async fn test_dead_letter_drain_respects_filter() {
        let sink = InMemoryDeadLetterSink::new();
        let now = Utc::now();
        for p in [PartitionId(0), PartitionId(1), PartitionId(0)] {
            sink.push(DeadLetterEntry {
                record_id: RecordId(1),
                partition: p,
                partition_key: key("s"),
                consumer: ConsumerId::new("proj-x"),
                payload: vec![],
                failure_reason: "boom".to_string(),
                attempt_count: 5,
                last_attempt_at: now,
                dead_lettered_at: now,
            })
            .await
            .unwrap();
        }

        assert_eq!(sink.count(None).await.unwrap(), 3);
        assert_eq!(sink.count(Some(PartitionId(0))).await.unwrap(), 2);

        let drained = sink
            .drain(&DeadLetterFilter {
                partition: Some(PartitionId(0)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(sink.count(None).await.unwrap(), 1);
    }
}
