//! Faro infrastructure
//!
//! Adapters behind the domain ports: PostgreSQL persistence for the outbox
//! log, ownership table, cursor store and dead-letter sink; in-memory
//! equivalents for tests and embedded deployments; and the NATS JetStream
//! delivery client.

pub mod messaging;
pub mod persistence;
