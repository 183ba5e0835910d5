//! Faro shared kernel
//!
//! Typed identifiers and configuration shared by every crate in the
//! workspace. Nothing in here does I/O except the config loader.

pub mod config;
pub mod ids;

pub use ids::{ConsumerId, FencingToken, InstanceId, PartitionId, PartitionKey, RecordId};
