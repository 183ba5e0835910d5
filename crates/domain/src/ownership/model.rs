//! Ownership Lease Model

use chrono::{DateTime, Utc};
use faro_shared::{FencingToken, InstanceId, PartitionId};
use serde::{Deserialize, Serialize};

/// One instance's claim on one partition.
///
/// At most one non-expired lease exists per partition. The fencing token
/// increments every time the partition changes hands, which is what lets
/// the cursor store reject a lingering ex-owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipLease {
    pub partition: PartitionId,
    pub instance: InstanceId,
    pub fencing_token: FencingToken,
    pub expires_at: DateTime<Utc>,
}

impl OwnershipLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, instance: InstanceId) -> bool {
        self.instance == instance
    }
}

/// Last observed heartbeat of a dispatcher instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance: InstanceId,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Liveness of an instance as seen by the assigner.
///
/// A graceful shutdown and a crash both end up here as `Expired`; the
/// assigner cannot (and must not) distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Expired,
}

impl InstanceHealth {
    pub fn liveness(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Liveness {
        if now.signed_duration_since(self.last_heartbeat_at) > timeout {
            Liveness::Expired
        } else {
            Liveness::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = OwnershipLease {
            partition: PartitionId(1),
            instance: InstanceId::new(),
            fencing_token: FencingToken::INITIAL,
            expires_at: now + Duration::seconds(30),
        };
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::seconds(30)));
        assert!(lease.is_expired(now + Duration::seconds(31)));
    }

    #[test]
    fn test_liveness_transitions_on_timeout() {
        let now = Utc::now();
        let health = InstanceHealth {
            instance: InstanceId::new(),
            last_heartbeat_at: now,
        };
        let timeout = Duration::seconds(15);
        assert_eq!(health.liveness(now, timeout), Liveness::Active);
        assert_eq!(
            health.liveness(now + Duration::seconds(15), timeout),
            Liveness::Active
        );
        assert_eq!(
            health.liveness(now + Duration::seconds(16), timeout),
            Liveness::Expired
        );
    }
}
