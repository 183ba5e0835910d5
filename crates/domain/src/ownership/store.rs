//! Ownership Store Port
//!
//! The externally persisted ownership table: instance heartbeats plus one
//! lease row per partition, written with compare-and-swap semantics.
//! Ownership is advisory (lease-based, not linearizable); workers treat
//! lease loss as a hard stop, which bounds the double-delivery window
//! without requiring a consensus store.

use crate::ownership::{InstanceHealth, OwnershipLease};
use crate::shared_kernel::Result;
use chrono::{DateTime, Utc};
use faro_shared::{InstanceId, PartitionId};

#[async_trait::async_trait]
pub trait OwnershipStore: Send + Sync {
    /// Record a heartbeat for `instance`, registering it on first call.
    async fn heartbeat(&self, instance: InstanceId, now: DateTime<Utc>) -> Result<()>;

    /// All known instances with their last heartbeat time. Liveness
    /// classification is the assigner's job, not the store's.
    async fn instances(&self) -> Result<Vec<InstanceHealth>>;

    /// Remove an instance record (graceful shutdown). Its leases are left
    /// to expire or be re-acquired; crash and shutdown look identical to
    /// the assigner.
    async fn deregister(&self, instance: InstanceId) -> Result<()>;

    /// Acquire or renew the lease on `partition` for `instance`.
    ///
    /// Succeeds when the partition is unleased, its lease has expired, or
    /// `instance` already holds it (renewal). The fencing token increments
    /// exactly when ownership changes hands; renewal keeps the token.
    ///
    /// Returns `None` when another instance holds a still-valid lease —
    /// that is contention, not an error.
    async fn acquire(
        &self,
        partition: PartitionId,
        instance: InstanceId,
        now: DateTime<Utc>,
        lease_duration: chrono::Duration,
    ) -> Result<Option<OwnershipLease>>;

    /// Release a lease if (and only if) `lease`'s fencing token is still
    /// the current one. A stale release is a silent no-op.
    async fn release(&self, lease: &OwnershipLease) -> Result<()>;

    /// Current lease row for `partition`, expired or not. Workers compare
    /// its fencing token against their own before every batch and between
    /// delivery attempts.
    async fn lease_of(&self, partition: PartitionId) -> Result<Option<OwnershipLease>>;
}

/// Check a worker-held lease against the store's view.
///
/// Valid means: same token, not expired at `now`. Anything else is the
/// mandatory stop signal from the spec — never an error to retry.
pub async fn lease_still_valid(
    store: &dyn OwnershipStore,
    lease: &OwnershipLease,
    now: DateTime<Utc>,
) -> Result<bool> {
    match store.lease_of(lease.partition).await? {
        Some(current) => Ok(current.fencing_token == lease.fencing_token
            && current.instance == lease.instance
            && !current.is_expired(now)),
        None => Ok(false),
    }
}
