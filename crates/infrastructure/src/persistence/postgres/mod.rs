//! PostgreSQL adapters for the storage ports.
//!
//! Each adapter owns its own `run_migrations` creating the tables and
//! indexes it needs; everything is `CREATE TABLE IF NOT EXISTS` so startup
//! is idempotent.

mod cursor;
mod dead_letter;
mod outbox;
mod ownership;

pub use cursor::PostgresCursorStore;
pub use dead_letter::PostgresDeadLetterSink;
pub use outbox::PostgresOutboxLog;
pub use ownership::PostgresOwnershipStore;
