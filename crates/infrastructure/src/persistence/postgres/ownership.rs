//! PostgreSQL Ownership Store
//!
//! Heartbeats and partition leases as conditionally-written rows. The
//! acquire path is a single upsert whose WHERE clause encodes the lease
//! rules, so two racing instances cannot both win a partition: whoever the
//! database serializes first gets the row, the other sees zero rows
//! returned.

use chrono::{DateTime, Utc};
use faro_domain::ownership::{InstanceHealth, OwnershipLease, OwnershipStore};
use faro_domain::shared_kernel::Result;
use faro_shared::{FencingToken, InstanceId, PartitionId};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

#[derive(FromRow)]
struct LeaseRow {
    partition_id: i32,
    instance_id: uuid::Uuid,
    fencing_token: i64,
    expires_at: DateTime<Utc>,
}

impl LeaseRow {
    fn into_lease(self) -> OwnershipLease {
        OwnershipLease {
            partition: PartitionId(self.partition_id as u32),
            instance: InstanceId(self.instance_id),
            fencing_token: FencingToken(self.fencing_token),
            expires_at: self.expires_at,
        }
    }
}

pub struct PostgresOwnershipStore {
    pool: PgPool,
}

impl PostgresOwnershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the instance and lease tables.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatcher_instances (
                instance_id UUID PRIMARY KEY,
                last_heartbeat_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partition_leases (
                partition_id INTEGER PRIMARY KEY,
                instance_id UUID NOT NULL,
                fencing_token BIGINT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl OwnershipStore for PostgresOwnershipStore {
    async fn heartbeat(&self, instance: InstanceId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatcher_instances (instance_id, last_heartbeat_at)
            VALUES ($1, $2)
            ON CONFLICT (instance_id) DO UPDATE SET last_heartbeat_at = EXCLUDED.last_heartbeat_at
            "#,
        )
        .bind(instance.0)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceHealth>> {
        let rows: Vec<(uuid::Uuid, DateTime<Utc>)> =
            sqlx::query_as("SELECT instance_id, last_heartbeat_at FROM dispatcher_instances")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, at)| InstanceHealth {
                instance: InstanceId(id),
                last_heartbeat_at: at,
            })
            .collect())
    }

    async fn deregister(&self, instance: InstanceId) -> Result<()> {
        sqlx::query("DELETE FROM dispatcher_instances WHERE instance_id = $1")
            .bind(instance.0)
            .execute(&self.pool)
            .await?;
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
        let row: Option<LeaseRow> = sqlx::query_as(
            r#"
            INSERT INTO partition_leases (partition_id, instance_id, fencing_token, expires_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (partition_id) DO UPDATE
            SET instance_id = EXCLUDED.instance_id,
                fencing_token = CASE
                    WHEN partition_leases.instance_id = EXCLUDED.instance_id
                         AND partition_leases.expires_at > $4
                    THEN partition_leases.fencing_token
                    ELSE partition_leases.fencing_token + 1
                END,
                expires_at = EXCLUDED.expires_at
            WHERE partition_leases.expires_at <= $4
               OR partition_leases.instance_id = EXCLUDED.instance_id
            RETURNING partition_id, instance_id, fencing_token, expires_at
            "#,
        )
        .bind(partition.as_u32() as i32)
        .bind(instance.0)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LeaseRow::into_lease))
    }

    async fn release(&self, lease: &OwnershipLease) -> Result<()> {
        // Conditional on the token so a stale ex-owner cannot expire a
        // successor's lease.
        sqlx::query(
            r#"
            UPDATE partition_leases
            SET expires_at = NOW()
            WHERE partition_id = $1 AND instance_id = $2 AND fencing_token = $3
            "#,
        )
        .bind(lease.partition.as_u32() as i32)
        .bind(lease.instance.0)
        .bind(lease.fencing_token.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lease_of(&self, partition: PartitionId) -> Result<Option<OwnershipLease>> {
        let row: Option<LeaseRow> = sqlx::query_as(
            r#"
            SELECT partition_id, instance_id, fencing_token, expires_at
            FROM partition_leases
            WHERE partition_id = $1
            "#,
        )
        .bind(partition.as_u32() as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LeaseRow::into_lease))
    }
}
