//! Outbox Record Model
//!
//! Domain model for outbox records used in the Transactional Outbox Pattern.

use chrono::{DateTime, Utc};
use faro_shared::{PartitionId, PartitionKey, RecordId};
use serde::{Deserialize, Serialize};

/// One pending unit of delivery work.
///
/// Written by the business transaction (via `OutboxLog::append`), mutated
/// only by the dispatcher worker: `dispatched_at` on success, the retry
/// bookkeeping fields on failure. `payload` and `partition_key` never
/// change after insertion.
///
/// Retry state is carried on the record rather than in worker memory so a
/// restart resumes exactly where the previous owner stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Log-assigned, monotonically increasing position
    pub id: RecordId,
    /// Logical partition, `hash(partition_key) mod N`, fixed at append time
    pub partition: PartitionId,
    /// Owning stream identifier
    pub partition_key: PartitionKey,
    /// Opaque event bytes; never interpreted by the dispatcher
    pub payload: Vec<u8>,
    /// Insertion timestamp
    pub created_at: DateTime<Utc>,
    /// Set once delivery is confirmed
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Delivery attempts made so far
    pub attempt_count: u32,
    /// Earliest time the next attempt may run (backoff)
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Error message from the last failed attempt
    pub last_error: Option<String>,
}

impl OutboxRecord {
    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Whether the record may be attempted at `now`, honoring backoff.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> OutboxRecord {
        OutboxRecord {
            id: RecordId(7),
            partition: PartitionId(2),
            partition_key: PartitionKey::new("order-42").unwrap(),
            payload: br#"{"kind":"OrderPlaced"}"#.to_vec(),
            created_at: Utc::now(),
            dispatched_at: None,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_fresh_record_is_eligible() {
        let r = record();
        assert!(!r.is_dispatched());
        assert!(r.is_eligible(Utc::now()));
    }

    #[test]
    fn test_backoff_defers_eligibility() {
        let now = Utc::now();
        let mut r = record();
        r.attempt_count = 2;
        r.next_attempt_at = Some(now + Duration::seconds(30));
        assert!(!r.is_eligible(now));
        assert!(r.is_eligible(now + Duration::seconds(31)));
    }

    #[test]
    fn test_serde_roundtrip_preserves_payload() {
        let r = record();
        let json = serde_json::to_string(&r).unwrap();
        let back: OutboxRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.payload, r.payload);
        assert_eq!(back.partition_key, r.partition_key);
    }
}
