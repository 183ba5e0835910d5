//! Configuration loader
//!
//! Loads configuration from an optional `.env` file plus environment
//! variables, then validates the result.

use std::path::Path;

use super::dto::DispatcherConfigDto;
use super::error::{ConfigError, Result};
use super::validator::validate_dispatcher_config;

/// Configuration loader
///
/// # Priority
///
/// Values from the `.env` file are loaded into the process environment
/// first (without overriding variables that are already set), then the DTO
/// is built from `std::env`.
///
/// # Example
///
/// ```ignore
/// use faro_shared::config::ConfigLoader;
///
/// let loader = ConfigLoader::new(Some(".env".into()));
/// let config = loader.load()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Optional path to .env file
    env_file_path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<std::path::PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the dispatcher configuration.
    pub fn load(&self) -> Result<DispatcherConfigDto> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = DispatcherConfigDto::from_env()?;
        validate_dispatcher_config(&config)?;
        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|source| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_file_is_an_error() {
        let loader = ConfigLoader::new(Some("/definitely/not/here/.env".into()));
        assert!(matches!(
            loader.load(),
            Err(ConfigError::EnvFileLoad { .. })
        ));
    }
}
