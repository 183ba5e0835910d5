//! NATS JetStream Delivery Client
//!
//! Concrete `DeliveryClient` that hands records to a JetStream stream and
//! waits for the storage ack. Publishing with ack-await gives the
//! at-least-once half of the contract; deduplication on the record id is
//! the consumer's half.

use async_nats::ConnectOptions;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::stream::Config as StreamConfig;
use faro_domain::delivery::{DeliveryClient, DeliveryOutcome};
use faro_domain::outbox::OutboxRecord;
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::config::NatsConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the NATS delivery client
#[derive(Debug, Clone)]
pub struct NatsDeliveryConfig {
    /// Stream the events live in
    pub stream_name: String,
    /// Subject prefix; the full subject is `{prefix}.{partition}.{key}`
    pub subject_prefix: String,
    /// How long to wait for the JetStream ack
    pub ack_timeout: Duration,
}

impl Default for NatsDeliveryConfig {
    fn default() -> Self {
        Self {
            stream_name: "FARO_EVENTS".to_string(),
            subject_prefix: "faro.events".to_string(),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// JetStream-backed delivery client.
pub struct NatsDeliveryClient {
    jetstream: JetStreamContext,
    config: NatsDeliveryConfig,
}

impl NatsDeliveryClient {
    /// Connect to NATS and build a client.
    pub async fn connect(nats: &NatsConfig, config: NatsDeliveryConfig) -> Result<Self> {
        let options = ConnectOptions::default()
            .connection_timeout(Duration::from_secs(nats.timeout_secs))
            .name("faro-dispatcher");

        let client = async_nats::connect_with_options(nats.urls.join(","), options)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let jetstream = async_nats::jetstream::new(client);
        Ok(Self { jetstream, config })
    }

    /// Wrap an existing client (used by tests against a local server).
    pub fn from_client(client: async_nats::Client, config: NatsDeliveryConfig) -> Self {
        Self {
            jetstream: async_nats::jetstream::new(client),
            config,
        }
    }

    /// Ensure the target stream exists.
    pub async fn ensure_stream(&self) -> Result<()> {
        let stream_name = self.config.stream_name.clone();
        match self.jetstream.get_stream(&stream_name).await {
            Ok(_) => {
                debug!("Stream '{}' already exists", stream_name);
                Ok(())
            }
            Err(_) => {
                info!("Creating stream '{}'", stream_name);
                let stream_config = StreamConfig {
                    name: stream_name.clone(),
                    subjects: vec![format!("{}.>", self.config.subject_prefix)],
                    storage: async_nats::jetstream::stream::StorageType::File,
                    num_replicas: 1,
                    ..Default::default()
                };
                self.jetstream
                    .create_stream(stream_config)
                    .await
                    .map_err(|e| DispatchError::Transport(e.to_string()))?;
                Ok(())
            }
        }
    }

}

/// Subject for a record: `{prefix}.{partition}.{key}`.
///
/// Returns `None` when the key cannot form a valid NATS subject token —
/// such a record can never be published and fails permanently.
fn subject_for(prefix: &str, record: &OutboxRecord) -> Option<String> {
    let key = record.partition_key.as_str();
    if key
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
    {
        return None;
    }
    Some(format!("{}.{}.{}", prefix, record.partition.as_u32(), key))
}

#[async_trait::async_trait]
impl DeliveryClient for NatsDeliveryClient {
    async fn deliver(&self, record: &OutboxRecord) -> DeliveryOutcome {
        let Some(subject) = subject_for(&self.config.subject_prefix, record) else {
            return DeliveryOutcome::PermanentFailure(format!(
                "partition key '{}' is not a valid subject token",
                record.partition_key
            ));
        };

        let publish = self
            .jetstream
            .publish(subject.clone(), record.payload.clone().into())
            .await;

        let ack = match publish {
            Ok(ack) => ack,
            Err(e) => {
                warn!(record_id = %record.id, subject = %subject, error = %e, "Publish failed");
                return DeliveryOutcome::RetryableFailure(e.to_string());
            }
        };

        match tokio::time::timeout(self.config.ack_timeout, ack).await {
            Ok(Ok(_)) => {
                debug!(record_id = %record.id, subject = %subject, "Record delivered");
                DeliveryOutcome::Delivered
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                // JetStream reports resource exhaustion distinctly; that is
                // backpressure, not a failed attempt.
                if message.contains("insufficient resources") {
                    DeliveryOutcome::Saturated
                } else {
                    DeliveryOutcome::RetryableFailure(message)
                }
            }
            Err(_) => DeliveryOutcome::RetryableFailure(format!(
                "no ack within {:?}",
                self.config.ack_timeout
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use faro_shared::{PartitionId, PartitionKey, RecordId};

    fn record(key: &str) -> OutboxRecord {
        OutboxRecord {
            id: RecordId(1),
            partition: PartitionId(3),
            partition_key: PartitionKey::new(key).unwrap(),
            payload: b"{}".to_vec(),
            created_at: Utc::now(),
            dispatched_at: None,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_subject_shape() {
        let subject = subject_for("faro.events", &record("order-42"));
        assert_eq!(subject.as_deref(), Some("faro.events.3.order-42"));
    }

    #[test]
    fn test_invalid_subject_tokens_are_rejected() {
        for bad in ["a.b", "a b", "a*", "a>"] {
            assert!(
                subject_for("faro.events", &record(bad)).is_none(),
                "{bad} should be rejected"
            );
        }
    }
}
