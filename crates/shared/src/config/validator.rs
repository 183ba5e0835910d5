//! Configuration validation

use super::dto::DispatcherConfigDto;
use super::error::{ConfigError, Result};

/// Validate a database URL format
pub fn validate_database_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ConfigError::InvalidDatabaseUrl(
            "Database URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
        return Err(ConfigError::InvalidDatabaseUrl(format!(
            "Database URL must start with postgres:// or postgresql://, got: {}",
            url
        )));
    }

    Ok(())
}

/// Validate a full dispatcher configuration.
///
/// Catches the combinations that would make the runtime misbehave rather
/// than fail fast: a zero partition count, a lease that expires between
/// heartbeats, a backoff that shrinks.
pub fn validate_dispatcher_config(config: &DispatcherConfigDto) -> Result<()> {
    validate_database_url(&config.database.url)?;

    if config.nats.urls.is_empty() {
        return Err(ConfigError::Validation(
            "At least one NATS URL is required".to_string(),
        ));
    }

    let d = &config.dispatch;

    if d.partition_count == 0 {
        return Err(ConfigError::Validation(
            "partition_count must be greater than 0".to_string(),
        ));
    }

    if d.consumer_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "consumer_id cannot be empty".to_string(),
        ));
    }

    if d.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch_size must be greater than 0".to_string(),
        ));
    }

    if d.heartbeat_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "heartbeat_interval_secs must be greater than 0".to_string(),
        ));
    }

    // A lease must survive at least two missed heartbeats, otherwise every
    // scheduling hiccup looks like a crashed instance.
    if d.lease_duration_secs < d.heartbeat_interval_secs * 2 {
        return Err(ConfigError::Validation(format!(
            "lease_duration_secs ({}) must be at least twice heartbeat_interval_secs ({})",
            d.lease_duration_secs, d.heartbeat_interval_secs
        )));
    }

    if d.retry_budget == 0 {
        return Err(ConfigError::Validation(
            "retry_budget must be greater than 0".to_string(),
        ));
    }

    if d.backoff.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff multiplier must be >= 1.0, got {}",
            d.backoff.multiplier
        )));
    }

    if d.backoff.max_delay_ms < d.backoff.initial_delay_ms {
        return Err(ConfigError::Validation(
            "backoff max_delay_ms must be >= initial_delay_ms".to_string(),
        ));
    }

    Ok(())
}
