//! Configuration validation.

use super::{types::Config, ConfigError};

/// Sanity-check a loaded configuration before wiring services to it.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "database.path must not be empty".to_string(),
        ));
    }

    if config.backend.base_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "backend.base_url must not be empty".to_string(),
        ));
    }
    if !config.backend.base_url.starts_with("http://")
        && !config.backend.base_url.starts_with("https://")
    {
        return Err(ConfigError::ValidationError(format!(
            "backend.base_url must be an http(s) URL, got {}",
            config.backend.base_url
        )));
    }

    if config.scheduler.dispatch_poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.dispatch_poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
