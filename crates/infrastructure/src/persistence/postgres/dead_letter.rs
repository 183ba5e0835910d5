//! PostgreSQL Dead-Letter Sink

use chrono::{DateTime, Utc};
use faro_domain::dead_letter::{DeadLetterEntry, DeadLetterFilter, DeadLetterSink};
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::{ConsumerId, PartitionId, PartitionKey, RecordId};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

#[derive(FromRow)]
struct DeadLetterRow {
    record_id: i64,
    partition_id: i32,
    partition_key: String,
    consumer_id: String,
    payload: Vec<u8>,
    failure_reason: String,
    attempt_count: i32,
    last_attempt_at: DateTime<Utc>,
    dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRow {
    fn into_entry(self) -> Result<DeadLetterEntry> {
        let partition_key = PartitionKey::new(self.partition_key).ok_or_else(|| {
            DispatchError::InfrastructureError {
                message: "empty partition key in dead_letters".to_string(),
            }
        })?;
        Ok(DeadLetterEntry {
            record_id: RecordId(self.record_id),
            partition: PartitionId(self.partition_id as u32),
            partition_key,
            consumer: ConsumerId::new(self.consumer_id),
            payload: self.payload,
            failure_reason: self.failure_reason,
            attempt_count: self.attempt_count.max(0) as u32,
            last_attempt_at: self.last_attempt_at,
            dead_lettered_at: self.dead_lettered_at,
        })
    }
}

pub struct PostgresDeadLetterSink {
    pool: PgPool,
}

impl PostgresDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the dead-letter table.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                record_id BIGINT NOT NULL,
                partition_id INTEGER NOT NULL,
                partition_key TEXT NOT NULL,
                consumer_id TEXT NOT NULL,
                payload BYTEA NOT NULL,
                failure_reason TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                last_attempt_at TIMESTAMPTZ NOT NULL,
                dead_lettered_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (record_id, consumer_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeadLetterSink for PostgresDeadLetterSink {
    async fn push(&self, entry: DeadLetterEntry) -> Result<()> {
        // Redelivery after a crash can dead-letter the same record twice;
        // keep the first entry.
        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (record_id, partition_id, partition_key, consumer_id, payload,
                 failure_reason, attempt_count, last_attempt_at, dead_lettered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (record_id, consumer_id) DO NOTHING
            "#,
        )
        .bind(entry.record_id.as_i64())
        .bind(entry.partition.as_u32() as i32)
        .bind(entry.partition_key.as_str())
        .bind(entry.consumer.as_str())
        .bind(&entry.payload)
        .bind(&entry.failure_reason)
        .bind(entry.attempt_count as i32)
        .bind(entry.last_attempt_at)
        .bind(entry.dead_lettered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drain(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        let mut builder = sqlx::QueryBuilder::new(
            r#"
            DELETE FROM dead_letters
            WHERE (record_id, consumer_id) IN (
                SELECT record_id, consumer_id FROM dead_letters WHERE TRUE
            "#,
        );
        if let Some(partition) = filter.partition {
            builder.push(" AND partition_id = ");
            builder.push_bind(partition.as_u32() as i32);
        }
        if let Some(before) = filter.before {
            builder.push(" AND dead_lettered_at < ");
            builder.push_bind(before);
        }
        builder.push(" ORDER BY dead_lettered_at ");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        builder.push(
            r#"
            )
            RETURNING record_id, partition_id, partition_key, consumer_id, payload,
                      failure_reason, attempt_count, last_attempt_at, dead_lettered_at
            "#,
        );

        let rows: Vec<DeadLetterRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(DeadLetterRow::into_entry).collect()
    }

    async fn count(&self, partition: Option<PartitionId>) -> Result<u64> {
        let count: i64 = match partition {
            Some(p) => {
                let (c,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE partition_id = $1")
                        .bind(p.as_u32() as i32)
                        .fetch_one(&self.pool)
                        .await?;
                c
            }
            None => {
                let (c,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
                    .fetch_one(&self.pool)
                    .await?;
                c
            }
        };
        Ok(count.max(0) as u64)
    }
}
