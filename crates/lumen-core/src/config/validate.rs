//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.io_workers == 0 {
            return Err(ConfigError::ValidationError(
                "pools.io_workers must be > 0".into(),
            ));
        }
        if self.pools.cpu_workers == 0 {
            return Err(ConfigError::ValidationError(
                "pools.cpu_workers must be > 0".into(),
            ));
        }
        if self.limits.max_download_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_download_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.limits.fetch_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "limits.fetch_timeout_ms must be > 0 when set".into(),
            ));
        }
        if self.filter.block_size == 0 {
            return Err(ConfigError::ValidationError(
                "filter.block_size must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.filter.intensity) {
            return Err(ConfigError::ValidationError(
                "filter.intensity must be between 0.0 and 1.0".into(),
            ));
        }
        if self.reporter.locale.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "reporter.locale must not be empty".into(),
            ));
        }
        Ok(())
    }
}
