//! Startup wiring
//!
//! Builds the PostgreSQL stores, the NATS delivery client and one
//! `DispatcherService`, runs its migrations, and supervises the instance
//! until shutdown.

mod shutdown;

pub use shutdown::{GracefulShutdown, ShutdownConfig, ShutdownReason};

use faro_application::admin::AdminApi;
use faro_application::dispatcher::{DispatcherService, DispatcherSettings};
use faro_domain::cursor::CursorStore;
use faro_domain::dead_letter::DeadLetterSink;
use faro_domain::delivery::DeliveryClient;
use faro_domain::outbox::OutboxLog;
use faro_domain::ownership::OwnershipStore;
use faro_domain::partition::Partitioner;
use faro_infrastructure::messaging::{NatsDeliveryClient, NatsDeliveryConfig};
use faro_infrastructure::persistence::{
    PostgresCursorStore, PostgresDeadLetterSink, PostgresOutboxLog, PostgresOwnershipStore,
};
use faro_shared::config::DispatcherConfigDto;
use faro_shared::{ConsumerId, InstanceId};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Run one dispatcher instance until a shutdown signal arrives.
pub async fn run(config: DispatcherConfigDto) -> anyhow::Result<()> {
    let instance = InstanceId::new();
    info!(
        instance = %instance,
        partitions = config.dispatch.partition_count,
        consumer = %config.dispatch.consumer_id,
        "Starting faro-server"
    );

    // Storage
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    let partitioner = Partitioner::new(config.dispatch.partition_count);
    let outbox = PostgresOutboxLog::new(pool.clone(), partitioner);
    outbox.run_migrations().await?;
    let ownership = PostgresOwnershipStore::new(pool.clone());
    ownership.run_migrations().await?;
    let cursors = PostgresCursorStore::new(pool.clone());
    cursors.run_migrations().await?;
    let dead_letters = PostgresDeadLetterSink::new(pool.clone());
    dead_letters.run_migrations().await?;
    info!("Database migrations applied");

    // Delivery transport
    let delivery = NatsDeliveryClient::connect(
        &config.nats,
        NatsDeliveryConfig {
            subject_prefix: config.nats.subject_prefix.clone(),
            ..Default::default()
        },
    )
    .await?;
    delivery.ensure_stream().await?;
    info!(urls = ?config.nats.urls, "Connected to NATS");

    let log: Arc<dyn OutboxLog> = Arc::new(outbox);
    let ownership: Arc<dyn OwnershipStore> = Arc::new(ownership);
    let cursors: Arc<dyn CursorStore> = Arc::new(cursors);
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(dead_letters);
    let delivery: Arc<dyn DeliveryClient> = Arc::new(delivery);

    // Dispatcher
    let settings = DispatcherSettings::from_config(&config.dispatch);
    let service = Arc::new(DispatcherService::new(
        instance,
        settings,
        Arc::clone(&log),
        Arc::clone(&ownership),
        Arc::clone(&cursors),
        Arc::clone(&delivery),
        Arc::clone(&dead_letters),
    ));

    let admin = Arc::new(AdminApi::new(
        ConsumerId::new(config.dispatch.consumer_id.clone()),
        config.dispatch.partition_count,
        Arc::clone(&log),
        Arc::clone(&ownership),
        Arc::clone(&cursors),
        Arc::clone(&dead_letters),
        service.rebalance_handle(),
    ));

    let graceful = GracefulShutdown::new(ShutdownConfig::default());

    let dispatcher_handle = {
        let service = Arc::clone(&service);
        let rx = graceful.subscribe();
        tokio::spawn(async move { service.run(rx).await })
    };

    spawn_status_reporter(
        Arc::clone(&service),
        Arc::clone(&admin),
        config.dispatch.dead_letter_retention_days,
        graceful.subscribe(),
    );

    // Block until SIGTERM/SIGINT, then drain.
    graceful.listen_for_signals().await;
    match graceful.drain(dispatcher_handle).await {
        Some(Ok(())) => info!("Dispatcher drained cleanly"),
        Some(Err(e)) => error!(error = %e, "Dispatcher stopped with error"),
        None => error!("Dispatcher did not drain in time"),
    }

    info!("{}", service.metrics().snapshot());
    Ok(())
}

/// Periodic operator-facing report: metrics, the partitions whose lag is
/// growing, and dead letters waiting for a drain before the retention
/// window closes on the records they reference.
fn spawn_status_reporter(
    service: Arc<DispatcherService>,
    admin: Arc<AdminApi>,
    dead_letter_retention_days: i64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            info!("{}", service.metrics().snapshot());
            match admin.status(None).await {
                Ok(statuses) => {
                    for status in statuses.iter().filter(|s| s.lag > 0 || s.dead_letters > 0) {
                        info!(
                            partition = %status.partition,
                            owner = ?status.owner,
                            lag = status.lag,
                            pending = status.pending,
                            dead_letters = status.dead_letters,
                            "Partition status"
                        );
                    }
                    let dead_letters: u64 = statuses.iter().map(|s| s.dead_letters).sum();
                    if dead_letters > 0 {
                        info!(
                            dead_letters,
                            retention_days = dead_letter_retention_days,
                            "Dead letters awaiting drain"
                        );
                    }
                }
                Err(e) => error!(error = %e, "Status query failed"),
            }
        }
    });
}
