//! PostgreSQL Outbox Log
//!
//! SQLx-based implementation of `OutboxLog`. Ids come from a BIGSERIAL
//! column, so id order equals insertion order; the partition is computed
//! from the key at append time and stored denormalized for the poll query.

use chrono::{DateTime, Utc};
use faro_domain::outbox::{OutboxLog, OutboxRecord};
use faro_domain::partition::Partitioner;
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::{PartitionId, PartitionKey, RecordId};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

#[derive(FromRow)]
struct OutboxRow {
    id: i64,
    partition_id: i32,
    partition_key: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    attempt_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl OutboxRow {
    fn into_record(self) -> Result<OutboxRecord> {
        let partition_key = PartitionKey::new(self.partition_key).ok_or_else(|| {
            DispatchError::InfrastructureError {
                message: "empty partition key in outbox_records".to_string(),
            }
        })?;
        Ok(OutboxRecord {
            id: RecordId(self.id),
            partition: PartitionId(self.partition_id as u32),
            partition_key,
            payload: self.payload,
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
            attempt_count: self.attempt_count.max(0) as u32,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
        })
    }
}

pub struct PostgresOutboxLog {
    pool: PgPool,
    partitioner: Partitioner,
}

impl PostgresOutboxLog {
    pub fn new(pool: PgPool, partitioner: Partitioner) -> Self {
        Self { pool, partitioner }
    }

    /// Create the outbox table and its indexes.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_records (
                id BIGSERIAL PRIMARY KEY,
                partition_id INTEGER NOT NULL,
                partition_key TEXT NOT NULL,
                payload BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                dispatched_at TIMESTAMPTZ,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TIMESTAMPTZ,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_partition_order
            ON outbox_records(partition_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_records(partition_id, id)
            WHERE dispatched_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append inside a caller-owned transaction.
    ///
    /// This is the writer-side entry point of the outbox pattern: the
    /// record commits or rolls back atomically with the business rows in
    /// the same transaction.
    pub async fn append_with_tx(
        &self,
        tx: &mut sqlx::PgTransaction<'_>,
        key: &PartitionKey,
        payload: &[u8],
    ) -> Result<RecordId> {
        let partition = self.partitioner.partition_for(key);
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO outbox_records (partition_id, partition_key, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(key.as_str())
        .bind(payload)
        .fetch_one(&mut **tx)
        .await?;
        Ok(RecordId(id))
    }
}

#[async_trait::async_trait]
impl OutboxLog for PostgresOutboxLog {
    async fn append(&self, key: &PartitionKey, payload: &[u8]) -> Result<RecordId> {
        let partition = self.partitioner.partition_for(key);
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO outbox_records (partition_id, partition_key, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(key.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(RecordId(id))
    }

    async fn read_from(
        &self,
        partition: PartitionId,
        after: RecordId,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, partition_id, partition_key, payload, created_at,
                   dispatched_at, attempt_count, next_attempt_at, last_error
            FROM outbox_records
            WHERE partition_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(after.as_i64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxRow::into_record).collect()
    }

    async fn head(&self, partition: PartitionId) -> Result<Option<RecordId>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(id) FROM outbox_records WHERE partition_id = $1")
                .bind(partition.as_u32() as i32)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0.map(RecordId))
    }

    async fn mark_dispatched(&self, id: RecordId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET dispatched_at = COALESCE(dispatched_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::RecordNotFound(id));
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        id: RecordId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET attempt_count = attempt_count + 1,
                last_error = $2,
                next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::RecordNotFound(id));
        }
        Ok(())
    }

    async fn pending_count(&self, partition: PartitionId) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM outbox_records
            WHERE partition_id = $1 AND dispatched_at IS NULL
            "#,
        )
        .bind(partition.as_u32() as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn cleanup_dispatched(&self, older_than: std::time::Duration) -> Result<u64> {
        let threshold = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_records
            WHERE dispatched_at IS NOT NULL AND dispatched_at < $1
            "#,
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<OutboxRecord>> {
        let row: Option<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, partition_id, partition_key, payload, created_at,
                   dispatched_at, attempt_count, next_attempt_at, last_error
            FROM outbox_records
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxRow::into_record).transpose()
    }
}
