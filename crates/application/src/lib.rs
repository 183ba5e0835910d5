//! Faro application layer
//!
//! The dispatcher runtime: one polling worker per owned partition,
//! supervised by an instance service that heartbeats, rebalances and
//! fences; plus the operator-facing replay controller and admin surface.

pub mod admin;
pub mod dispatcher;
pub mod metrics;
pub mod replay;
pub mod worker;

pub use admin::{AdminApi, PartitionStatus};
pub use dispatcher::{DispatcherService, DispatcherSettings};
pub use metrics::{DispatcherMetrics, DispatcherMetricsSnapshot};
pub use replay::{ReplayController, ReplayScope, ReplaySummary, ReplayTarget};
pub use worker::{PartitionWorker, WorkerExit, WorkerSettings};
