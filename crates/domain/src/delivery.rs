//! Delivery Client Port
//!
//! Boundary to the downstream transport. The transport is a black box:
//! Faro hands it one record at a time and acts on the reported outcome.
//! Delivery may happen more than once for the same record; consumers
//! deduplicate on the record id.

use crate::outbox::OutboxRecord;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted downstream; the cursor may advance past this record.
    Delivered,
    /// Transient failure (timeout, connection drop). Retried with backoff
    /// until the attempt budget runs out.
    RetryableFailure(String),
    /// The downstream rejected the record itself (malformed payload,
    /// contract violation). Dead-lettered immediately; retrying cannot help.
    PermanentFailure(String),
    /// The downstream is saturated. Not a failure and not an attempt: the
    /// worker pauses polling the partition for a bounded interval.
    Saturated,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::RetryableFailure(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryOutcome::PermanentFailure(_))
    }
}

#[async_trait::async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Attempt to deliver one record. Must be safe to call repeatedly for
    /// the same record.
    async fn deliver(&self, record: &OutboxRecord) -> DeliveryOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_predicates() {
        assert!(DeliveryOutcome::Delivered.is_delivered());
        assert!(DeliveryOutcome::RetryableFailure("timeout".into()).is_retryable());
        assert!(DeliveryOutcome::PermanentFailure("bad payload".into()).is_permanent());
        assert!(!DeliveryOutcome::Saturated.is_retryable());
    }
}
