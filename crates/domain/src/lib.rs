//! Faro domain
//!
//! Models, ports and pure logic for the partitioned outbox dispatcher:
//! the outbox log, partition hashing, ownership leases and assignment,
//! per-consumer cursors, the delivery boundary, dead-lettering and retry
//! backoff. Everything stateful lives behind a trait; adapters are in
//! `faro-infrastructure`.

pub mod backoff;
pub mod cursor;
pub mod dead_letter;
pub mod delivery;
pub mod outbox;
pub mod ownership;
pub mod partition;
pub mod shared_kernel;

pub use shared_kernel::{DispatchError, Result};
