//! Delivery transport adapters.

pub mod nats;

pub use nats::{NatsDeliveryClient, NatsDeliveryConfig};
