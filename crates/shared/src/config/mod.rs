//! Configuration subsystem
//!
//! Configuration is loaded once at startup from the environment (optionally
//! seeded from a `.env` file), validated, and passed to services as an
//! immutable DTO.

mod dto;
mod error;
mod loader;
mod validator;

pub use dto::{
    BackoffConfig, DatabaseConfig, DispatchConfig, DispatcherConfigDto, LoggingConfig, NatsConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::validate_dispatcher_config;
