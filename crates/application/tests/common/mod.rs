//! Shared fixtures for the dispatcher integration tests.

use faro_application::metrics::DispatcherMetrics;
use faro_application::worker::WorkerSettings;
use faro_domain::backoff::BackoffPolicy;
use faro_domain::delivery::{DeliveryClient, DeliveryOutcome};
use faro_domain::outbox::{OutboxLog, OutboxRecord};
use faro_domain::partition::Partitioner;
use faro_infrastructure::persistence::{
    InMemoryCursorStore, InMemoryDeadLetterSink, InMemoryOutboxLog, InMemoryOwnershipStore,
};
use faro_shared::{ConsumerId, PartitionKey, RecordId};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-record delivery script.
pub enum Script {
    /// Same outcome on every attempt
    Always(DeliveryOutcome),
    /// Outcomes consumed in order; `Delivered` once exhausted
    Sequence(VecDeque<DeliveryOutcome>),
}

/// Delivery client driven by per-record scripts; unscripted records are
/// always delivered. Records every attempt and every confirmed delivery.
#[derive(Default)]
pub struct ScriptedDeliveryClient {
    scripts: Mutex<HashMap<RecordId, Script>>,
    attempts: Mutex<Vec<RecordId>>,
    delivered: Mutex<Vec<RecordId>>,
}

impl ScriptedDeliveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, id: RecordId, script: Script) {
        self.scripts.lock().unwrap().insert(id, script);
    }

    /// Every attempt, in order.
    pub fn attempts(&self) -> Vec<RecordId> {
        self.attempts.lock().unwrap().clone()
    }

    /// Every confirmed delivery, in order (duplicates included).
    pub fn delivered(&self) -> Vec<RecordId> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempt_count_for(&self, id: RecordId) -> usize {
        self.attempts.lock().unwrap().iter().filter(|a| **a == id).count()
    }
}

#[async_trait::async_trait]
impl DeliveryClient for ScriptedDeliveryClient {
    async fn deliver(&self, record: &OutboxRecord) -> DeliveryOutcome {
        self.attempts.lock().unwrap().push(record.id);

        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&record.id) {
                Some(Script::Always(outcome)) => outcome.clone(),
                Some(Script::Sequence(queue)) => {
                    queue.pop_front().unwrap_or(DeliveryOutcome::Delivered)
                }
                None => DeliveryOutcome::Delivered,
            }
        };

        if outcome.is_delivered() {
            self.delivered.lock().unwrap().push(record.id);
        }
        outcome
    }
}

/// All stores plus a scripted client, wired over one partitioner.
pub struct Harness {
    pub partitioner: Partitioner,
    pub log: Arc<InMemoryOutboxLog>,
    pub ownership: Arc<InMemoryOwnershipStore>,
    pub cursors: Arc<InMemoryCursorStore>,
    pub sink: Arc<InMemoryDeadLetterSink>,
    pub client: Arc<ScriptedDeliveryClient>,
    pub metrics: Arc<DispatcherMetrics>,
}

impl Harness {
    pub fn new(partition_count: u32) -> Self {
        let partitioner = Partitioner::new(partition_count);
        Self {
            partitioner,
            log: Arc::new(InMemoryOutboxLog::new(partitioner)),
            ownership: Arc::new(InMemoryOwnershipStore::new()),
            cursors: Arc::new(InMemoryCursorStore::new()),
            sink: Arc::new(InMemoryDeadLetterSink::new()),
            client: Arc::new(ScriptedDeliveryClient::new()),
            metrics: Arc::new(DispatcherMetrics::new()),
        }
    }

    pub async fn append(&self, key: &str, payload: &[u8]) -> RecordId {
        self.log
            .append(&PartitionKey::new(key).unwrap(), payload)
            .await
            .unwrap()
    }
}

pub fn consumer() -> ConsumerId {
    ConsumerId::new("proj-x")
}

/// Worker settings tuned for fast tests.
pub fn fast_settings(retry_budget: u32) -> WorkerSettings {
    WorkerSettings {
        consumer: consumer(),
        batch_size: 16,
        poll_interval: Duration::from_millis(10),
        retry_budget,
        backoff: BackoffPolicy::new(Duration::from_millis(5), 2.0, Duration::from_millis(40)),
        saturation_pause: Duration::from_millis(10),
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for<F>(mut predicate: F, deadline: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
