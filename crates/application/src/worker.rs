//! Partition Worker
//!
//! One polling loop per owned partition. The worker reads records past the
//! consumer's cursor in id order, hands each to the delivery client, and
//! advances the cursor on success. Failures retry with exponential backoff
//! up to the attempt budget, then dead-letter and the cursor moves past the
//! record so one poison record cannot stall its partition.
//!
//! The fencing token is re-checked before every batch and between delivery
//! attempts; a stale token is a hard stop, not an error.

use crate::metrics::DispatcherMetrics;
use chrono::Utc;
use faro_domain::backoff::BackoffPolicy;
use faro_domain::cursor::CursorStore;
use faro_domain::dead_letter::{DeadLetterEntry, DeadLetterSink};
use faro_domain::delivery::{DeliveryClient, DeliveryOutcome};
use faro_domain::outbox::{OutboxLog, OutboxRecord};
use faro_domain::ownership::{OwnershipLease, OwnershipStore, lease_still_valid};
use faro_domain::shared_kernel::{DispatchError, Result};
use faro_shared::ConsumerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Tuning for one partition worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Consumer the cursor belongs to
    pub consumer: ConsumerId,
    /// Records read per poll
    pub batch_size: usize,
    /// Sleep when the partition is idle
    pub poll_interval: Duration,
    /// Delivery attempts per record before dead-lettering
    pub retry_budget: u32,
    /// Backoff between attempts
    pub backoff: BackoffPolicy,
    /// Pause when the downstream signals saturation
    pub saturation_pause: Duration,
}

/// What happened to one record.
enum RecordStep {
    /// Cursor advanced past it (delivered or dead-lettered)
    Advanced,
    /// Lease lost or shutdown requested; stop the partition now
    Stop,
}

/// Why the worker stopped. Informational; none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    ShutdownRequested,
    LeaseLost,
}

pub struct PartitionWorker {
    lease: OwnershipLease,
    settings: WorkerSettings,
    log: Arc<dyn OutboxLog>,
    ownership: Arc<dyn OwnershipStore>,
    cursors: Arc<dyn CursorStore>,
    delivery: Arc<dyn DeliveryClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<DispatcherMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl PartitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lease: OwnershipLease,
        settings: WorkerSettings,
        log: Arc<dyn OutboxLog>,
        ownership: Arc<dyn OwnershipStore>,
        cursors: Arc<dyn CursorStore>,
        delivery: Arc<dyn DeliveryClient>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<DispatcherMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            lease,
            settings,
            log,
            ownership,
            cursors,
            delivery,
            dead_letters,
            metrics,
            shutdown,
        }
    }

    /// Run until shutdown, lease loss, or a fatal storage error.
    pub async fn run(mut self) -> Result<WorkerExit> {
        let partition = self.lease.partition;
        info!(
            partition = %partition,
            instance = %self.lease.instance,
            fencing_token = %self.lease.fencing_token,
            "Partition worker starting"
        );

        loop {
            if *self.shutdown.borrow() {
                debug!(partition = %partition, "Shutdown requested, stopping worker");
                return Ok(WorkerExit::ShutdownRequested);
            }

            if !lease_still_valid(self.ownership.as_ref(), &self.lease, Utc::now()).await? {
                warn!(
                    partition = %partition,
                    fencing_token = %self.lease.fencing_token,
                    "Lease no longer valid, stopping worker"
                );
                self.metrics.inc_lease_lost();
                return Ok(WorkerExit::LeaseLost);
            }

            let cursor = self
                .cursors
                .get(partition, &self.settings.consumer)
                .await?;
            let batch = self
                .log
                .read_from(partition, cursor, self.settings.batch_size)
                .await?;

            if batch.is_empty() {
                if self.pause(self.settings.poll_interval).await {
                    return Ok(WorkerExit::ShutdownRequested);
                }
                continue;
            }

            self.metrics.inc_batch();
            debug!(partition = %partition, count = batch.len(), "Processing batch");

            for record in &batch {
                match self.dispatch_record(record).await? {
                    RecordStep::Advanced => {}
                    RecordStep::Stop => {
                        return Ok(if *self.shutdown.borrow() {
                            WorkerExit::ShutdownRequested
                        } else {
                            self.metrics.inc_lease_lost();
                            WorkerExit::LeaseLost
                        });
                    }
                }
            }
        }
    }

    /// Deliver one record, retrying with backoff until the budget runs out.
    ///
    /// Returns `Advanced` once the cursor moved past the record, by either
    /// path: confirmed delivery, or dead-lettering.
    async fn dispatch_record(&mut self, record: &OutboxRecord) -> Result<RecordStep> {
        // Honor backoff persisted by a previous owner of this partition.
        let now = Utc::now();
        if !record.is_eligible(now) {
            if let Some(at) = record.next_attempt_at {
                let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                if self.pause(wait).await {
                    return Ok(RecordStep::Stop);
                }
            }
        }

        let mut attempts = record.attempt_count;

        loop {
            if *self.shutdown.borrow() {
                return Ok(RecordStep::Stop);
            }
            if !lease_still_valid(self.ownership.as_ref(), &self.lease, Utc::now()).await? {
                return Ok(RecordStep::Stop);
            }

            match self.delivery.deliver(record).await {
                DeliveryOutcome::Delivered => {
                    self.log.mark_dispatched(record.id, Utc::now()).await?;
                    match self.advance_cursor(record).await? {
                        RecordStep::Advanced => {
                            self.metrics.inc_dispatched();
                            debug!(
                                partition = %record.partition,
                                record_id = %record.id,
                                "Record dispatched"
                            );
                            return Ok(RecordStep::Advanced);
                        }
                        RecordStep::Stop => return Ok(RecordStep::Stop),
                    }
                }
                DeliveryOutcome::RetryableFailure(reason) => {
                    attempts += 1;
                    if attempts >= self.settings.retry_budget {
                        error!(
                            partition = %record.partition,
                            record_id = %record.id,
                            attempts,
                            reason = %reason,
                            "Retry budget exhausted, dead-lettering"
                        );
                        return self.dead_letter(record, &reason, attempts).await;
                    }

                    let delay = self.settings.backoff.delay_for(attempts);
                    warn!(
                        partition = %record.partition,
                        record_id = %record.id,
                        attempt = attempts,
                        budget = self.settings.retry_budget,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Delivery failed, backing off"
                    );
                    let next_attempt_at =
                        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.log
                        .record_attempt(record.id, &reason, next_attempt_at)
                        .await?;
                    self.metrics.inc_retried();
                    if self.pause(delay).await {
                        return Ok(RecordStep::Stop);
                    }
                }
                DeliveryOutcome::PermanentFailure(reason) => {
                    error!(
                        partition = %record.partition,
                        record_id = %record.id,
                        reason = %reason,
                        "Permanent delivery failure, dead-lettering"
                    );
                    return self.dead_letter(record, &reason, attempts + 1).await;
                }
                DeliveryOutcome::Saturated => {
                    // Backpressure: bounded pause, no attempt consumed, no
                    // in-memory buffering.
                    debug!(
                        partition = %record.partition,
                        "Downstream saturated, pausing partition"
                    );
                    if self.pause(self.settings.saturation_pause).await {
                        return Ok(RecordStep::Stop);
                    }
                }
            }
        }
    }

    /// Copy the record to the dead-letter sink and move the cursor past it.
    async fn dead_letter(
        &mut self,
        record: &OutboxRecord,
        reason: &str,
        attempts: u32,
    ) -> Result<RecordStep> {
        let entry = DeadLetterEntry::from_record(
            record,
            &self.settings.consumer,
            reason,
            attempts,
            Utc::now(),
        );
        self.dead_letters.push(entry).await?;
        self.metrics.inc_dead_lettered();
        self.advance_cursor(record).await
    }

    /// Conditionally advance the cursor to this record.
    ///
    /// A stale fencing token here means another owner took over mid-record:
    /// stop, do not treat as an error.
    async fn advance_cursor(&self, record: &OutboxRecord) -> Result<RecordStep> {
        match self
            .cursors
            .advance(
                record.partition,
                &self.settings.consumer,
                record.id,
                self.lease.fencing_token,
            )
            .await
        {
            Ok(()) => Ok(RecordStep::Advanced),
            Err(DispatchError::StaleFencingToken {
                partition,
                presented,
                current,
            }) => {
                warn!(
                    partition = %partition,
                    presented = %presented,
                    current = %current,
                    "Cursor advance fenced off, stopping worker"
                );
                Ok(RecordStep::Stop)
            }
            Err(e) => Err(e),
        }
    }

    /// Sleep for `duration`, returning early (and `true`) on shutdown.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.shutdown.changed() => *self.shutdown.borrow(),
        }
    }
}
