//! Dispatcher Service
//!
//! The per-instance runtime. On every tick it heartbeats, recomputes the
//! partition assignment from the live instance set, acquires or renews the
//! leases it should hold, and keeps exactly one `PartitionWorker` running
//! per owned partition. Partitions it no longer owns are stopped and their
//! leases released.
//!
//! Ticks fire on the heartbeat interval, on a forced rebalance, and on
//! shutdown. A crashed sibling shows up as an expired heartbeat; its
//! partitions are re-acquired with bumped fencing tokens on the next tick.

use crate::metrics::DispatcherMetrics;
use crate::worker::{PartitionWorker, WorkerSettings};
use chrono::Utc;
use faro_domain::backoff::BackoffPolicy;
use faro_domain::cursor::CursorStore;
use faro_domain::dead_letter::DeadLetterSink;
use faro_domain::delivery::DeliveryClient;
use faro_domain::outbox::OutboxLog;
use faro_domain::ownership::{OwnershipLease, OwnershipStore, PartitionAssigner};
use faro_domain::shared_kernel::Result;
use faro_shared::config::DispatchConfig;
use faro_shared::{ConsumerId, InstanceId, PartitionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime settings for one dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub consumer: ConsumerId,
    pub partition_count: u32,
    pub lease_duration: chrono::Duration,
    pub heartbeat_interval: Duration,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub retry_budget: u32,
    pub backoff: BackoffPolicy,
    pub saturation_pause: Duration,
}

impl DispatcherSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            consumer: ConsumerId::new(config.consumer_id.clone()),
            partition_count: config.partition_count,
            lease_duration: chrono::Duration::seconds(config.lease_duration_secs as i64),
            heartbeat_interval: config.heartbeat_interval(),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval(),
            retry_budget: config.retry_budget,
            backoff: BackoffPolicy::from_config(&config.backoff),
            saturation_pause: config.poll_interval(),
        }
    }

    fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            consumer: self.consumer.clone(),
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            retry_budget: self.retry_budget,
            backoff: self.backoff,
            saturation_pause: self.saturation_pause,
        }
    }
}

struct WorkerHandle {
    lease: OwnershipLease,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct DispatcherService {
    instance: InstanceId,
    settings: DispatcherSettings,
    assigner: PartitionAssigner,
    log: Arc<dyn OutboxLog>,
    ownership: Arc<dyn OwnershipStore>,
    cursors: Arc<dyn CursorStore>,
    delivery: Arc<dyn DeliveryClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<DispatcherMetrics>,
    rebalance: Arc<Notify>,
}

impl DispatcherService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: InstanceId,
        settings: DispatcherSettings,
        log: Arc<dyn OutboxLog>,
        ownership: Arc<dyn OwnershipStore>,
        cursors: Arc<dyn CursorStore>,
        delivery: Arc<dyn DeliveryClient>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        // An instance that misses two heartbeats in a row is gone.
        let liveness_timeout = chrono::Duration::from_std(settings.heartbeat_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        let assigner = PartitionAssigner::new(settings.partition_count, liveness_timeout);

        Self {
            instance,
            settings,
            assigner,
            log,
            ownership,
            cursors,
            delivery,
            dead_letters,
            metrics: Arc::new(DispatcherMetrics::new()),
            rebalance: Arc::new(Notify::new()),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn metrics(&self) -> Arc<DispatcherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle for forcing a rebalance tick (admin surface).
    pub fn rebalance_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.rebalance)
    }

    /// Run until `shutdown` flips to true. Owns the worker set for the
    /// whole instance lifetime; on exit every lease is released
    /// proactively and the instance deregisters.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            instance = %self.instance,
            partitions = self.settings.partition_count,
            consumer = %self.settings.consumer,
            "🚀 Dispatcher starting"
        );

        let mut workers: HashMap<PartitionId, WorkerHandle> = HashMap::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick(&mut workers).await {
                // The tick is retried either way: the store may come back,
                // and until then every worker is already stopping on its
                // own failed reads.
                if e.is_fatal() {
                    error!(instance = %self.instance, error = %e, "Rebalance tick failed");
                } else {
                    warn!(instance = %self.instance, error = %e, "Rebalance tick degraded");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.heartbeat_interval) => {}
                _ = self.rebalance.notified() => {
                    info!(instance = %self.instance, "Forced rebalance requested");
                }
                _ = shutdown.changed() => {}
            }
        }

        self.shutdown_workers(&mut workers).await;
        if let Err(e) = self.ownership.deregister(self.instance).await {
            warn!(instance = %self.instance, error = %e, "Deregistration failed");
        }
        info!(instance = %self.instance, "Dispatcher stopped");
        Ok(())
    }

    /// One heartbeat/rebalance cycle.
    async fn tick(&self, workers: &mut HashMap<PartitionId, WorkerHandle>) -> Result<()> {
        let now = Utc::now();
        self.ownership.heartbeat(self.instance, now).await?;

        let healths = self.ownership.instances().await?;
        let live = self.assigner.live_instances(&healths, now);
        let desired = self.assigner.partitions_for(self.instance, &live);

        // Reap workers that stopped on their own (lease loss, fatal error).
        workers.retain(|partition, handle| {
            if handle.join.is_finished() {
                debug!(partition = %partition, "Reaping finished worker");
                false
            } else {
                true
            }
        });

        // Stop and release partitions we no longer own.
        let stale: Vec<PartitionId> = workers
            .keys()
            .filter(|p| !desired.contains(p))
            .copied()
            .collect();
        for partition in stale {
            if let Some(handle) = workers.remove(&partition) {
                info!(
                    instance = %self.instance,
                    partition = %partition,
                    "Partition reassigned away, stopping worker"
                );
                let _ = handle.shutdown.send(true);
                let _ = handle.join.await;
                self.ownership.release(&handle.lease).await?;
            }
        }

        // Acquire or renew everything we should own; spawn missing workers.
        for partition in desired {
            match self
                .ownership
                .acquire(partition, self.instance, now, self.settings.lease_duration)
                .await?
            {
                Some(lease) => match workers.get(&partition) {
                    Some(handle) if handle.lease.fencing_token == lease.fencing_token => {
                        // Renewed; the running worker is still current.
                    }
                    Some(_) => {
                        // Token moved while a worker was still running: it
                        // will fence itself off; replace it next tick.
                        debug!(partition = %partition, "Fencing token changed, worker will stop");
                    }
                    None => {
                        self.spawn_worker(workers, lease);
                    }
                },
                None => {
                    // Still validly leased elsewhere; the assignment will
                    // converge once that lease expires or is released.
                    debug!(
                        instance = %self.instance,
                        partition = %partition,
                        "Partition still leased by another instance"
                    );
                }
            }
        }

        Ok(())
    }

    fn spawn_worker(&self, workers: &mut HashMap<PartitionId, WorkerHandle>, lease: OwnershipLease) {
        let partition = lease.partition;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            lease.clone(),
            self.settings.worker_settings(),
            Arc::clone(&self.log),
            Arc::clone(&self.ownership),
            Arc::clone(&self.cursors),
            Arc::clone(&self.delivery),
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.metrics),
            shutdown_rx,
        );

        let join = tokio::spawn(async move {
            match worker.run().await {
                Ok(exit) => debug!(partition = %partition, exit = ?exit, "Worker stopped"),
                Err(e) => error!(partition = %partition, error = %e, "Worker failed"),
            }
        });

        info!(
            instance = %self.instance,
            partition = %partition,
            fencing_token = %lease.fencing_token,
            "Partition worker spawned"
        );
        workers.insert(
            partition,
            WorkerHandle {
                lease,
                shutdown: shutdown_tx,
                join,
            },
        );
    }

    /// Cooperative shutdown: stop every worker, then release every lease so
    /// successors do not have to wait out the expiry.
    async fn shutdown_workers(&self, workers: &mut HashMap<PartitionId, WorkerHandle>) {
        info!(
            instance = %self.instance,
            count = workers.len(),
            "Stopping partition workers"
        );
        for (_, handle) in workers.drain() {
            let _ = handle.shutdown.send(true);
            let _ = handle.join.await;
            if let Err(e) = self.ownership.release(&handle.lease).await {
                warn!(
                    partition = %handle.lease.partition,
                    error = %e,
                    "Lease release failed; it will expire on its own"
                );
            }
        }
    }
}
