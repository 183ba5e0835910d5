//! Graceful Shutdown
//!
//! Coordinated stop for the dispatcher: a shutdown flag every component
//! watches, flipped by SIGTERM/SIGINT or programmatically, with a bounded
//! drain timeout. Lease release on this path is cooperative; a crash skips
//! it and the leases expire instead.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown configuration
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for workers to drain
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Why shutdown was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Programmatic,
}

/// Graceful shutdown coordinator
#[derive(Clone)]
pub struct GracefulShutdown {
    tx: watch::Sender<bool>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx, config }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Receiver components select on; flips to `true` exactly once.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self, reason: ShutdownReason) {
        info!(reason = ?reason, "Shutdown triggered");
        let _ = self.tx.send(true);
    }

    /// Block until SIGTERM or SIGINT, then trigger.
    pub async fn listen_for_signals(&self) {
        wait_for_signal().await;
        self.trigger(ShutdownReason::Signal);
    }

    /// Await `task` up to the drain timeout, then give up.
    pub async fn drain<T>(&self, task: tokio::task::JoinHandle<T>) -> Option<T> {
        match tokio::time::timeout(self.config.timeout, task).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(error = %e, "Drained task panicked");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.config.timeout, "Drain timeout exceeded, abandoning task");
                None
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                info!("SIGINT received");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
    }
}
