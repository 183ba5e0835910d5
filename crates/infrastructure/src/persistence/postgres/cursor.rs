//! PostgreSQL Cursor Store
//!
//! The advance path is one conditional upsert; when it matches nothing the
//! current row is read back to classify the rejection (stale token vs.
//! regression) for the caller.

use chrono::{DateTime, Utc};
use faro_domain::cursor::{Cursor, CursorStore};
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::{ConsumerId, FencingToken, PartitionId, RecordId};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

#[derive(FromRow)]
struct CursorRow {
    partition_id: i32,
    consumer_id: String,
    last_dispatched_id: i64,
    fencing_token: i64,
    updated_at: DateTime<Utc>,
}

impl CursorRow {
    fn into_cursor(self) -> Cursor {
        Cursor {
            partition: PartitionId(self.partition_id as u32),
            consumer: ConsumerId::new(self.consumer_id),
            last_dispatched: RecordId(self.last_dispatched_id),
            fencing_token: FencingToken(self.fencing_token),
            updated_at: self.updated_at,
        }
    }
}

pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the cursor table.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consumer_cursors (
                partition_id INTEGER NOT NULL,
                consumer_id TEXT NOT NULL,
                last_dispatched_id BIGINT NOT NULL DEFAULT 0,
                fencing_token BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (partition_id, consumer_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CursorStore for PostgresCursorStore {
    async fn get(&self, partition: PartitionId, consumer: &ConsumerId) -> Result<RecordId> {
        Ok(self
            .find(partition, consumer)
            .await?
            .map(|c| c.last_dispatched)
            .unwrap_or(RecordId::ZERO))
    }

    async fn find(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
    ) -> Result<Option<Cursor>> {
        let row: Option<CursorRow> = sqlx::query_as(
            r#"
            SELECT partition_id, consumer_id, last_dispatched_id, fencing_token, updated_at
            FROM consumer_cursors
            WHERE partition_id = $1 AND consumer_id = $2
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(consumer.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CursorRow::into_cursor))
    }

    async fn advance(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
        new_id: RecordId,
        token: FencingToken,
    ) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO consumer_cursors
                (partition_id, consumer_id, last_dispatched_id, fencing_token, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (partition_id, consumer_id) DO UPDATE
            SET last_dispatched_id = EXCLUDED.last_dispatched_id,
                fencing_token = EXCLUDED.fencing_token,
                updated_at = EXCLUDED.updated_at
            WHERE EXCLUDED.fencing_token >= consumer_cursors.fencing_token
              AND EXCLUDED.last_dispatched_id >= consumer_cursors.last_dispatched_id
            RETURNING last_dispatched_id
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(consumer.as_str())
        .bind(new_id.as_i64())
        .bind(token.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            return Ok(());
        }

        // Rejected: read the row back to say why.
        match self.find(partition, consumer).await? {
            Some(current) if token < current.fencing_token => {
                Err(DispatchError::StaleFencingToken {
                    partition,
                    presented: token,
                    current: current.fencing_token,
                })
            }
            Some(current) => Err(DispatchError::CursorRegression {
                partition,
                consumer: consumer.clone(),
                stored: current.last_dispatched,
                attempted: new_id,
            }),
            None => Err(DispatchError::InfrastructureError {
                message: format!(
                    "cursor upsert for {partition}/{consumer} matched nothing and no row exists"
                ),
            }),
        }
    }

    async fn reset(
        &self,
        partition: PartitionId,
        consumer: &ConsumerId,
        to: RecordId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_cursors
                (partition_id, consumer_id, last_dispatched_id, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (partition_id, consumer_id) DO UPDATE
            SET last_dispatched_id = EXCLUDED.last_dispatched_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(consumer.as_str())
        .bind(to.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
