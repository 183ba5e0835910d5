//! Persistence adapters for the storage ports.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryCursorStore, InMemoryDeadLetterSink, InMemoryOutboxLog, InMemoryOwnershipStore};
pub use postgres::{
    PostgresCursorStore, PostgresDeadLetterSink, PostgresOutboxLog, PostgresOwnershipStore,
};
