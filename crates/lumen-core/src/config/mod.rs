//! Configuration management for Lumen.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. Every section implements `Default`, so a partial file is fine.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Lumen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution pool sizes
    pub pools: PoolConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Fetch transport settings
    pub fetch: FetchConfig,

    /// Filter effect settings
    pub filter: FilterConfig,

    /// User-visible error reporting
    pub reporter: ReporterConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.lumen.lumen/config.toml
    /// - Linux: ~/.config/lumen/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\lumen\config\config.toml
    ///
    /// Falls back to ~/.lumen/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "lumen", "lumen")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".lumen").join("config.toml")
            })
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::EffectKind;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pools.io_workers, 4);
        assert!(config.pools.cpu_workers > 0);
        assert_eq!(config.limits.max_download_mb, 50);
        assert!(config.limits.fetch_timeout_ms.is_none());
        assert_eq!(config.filter.effect, EffectKind::Pixelate);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[pools]"));
        assert!(toml.contains("[filter]"));
        assert!(toml.contains("effect = \"pixelate\""));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [filter]
            effect = "sepia"
            intensity = 0.5

            [limits]
            fetch_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.filter.effect, EffectKind::Sepia);
        assert_eq!(config.filter.intensity, 0.5);
        assert_eq!(config.filter.block_size, 8);
        assert_eq!(config.limits.fetch_timeout_ms, Some(2500));
        assert_eq!(config.pools.io_workers, 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reporter]\nlocale = \"de\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.reporter.locale, "de");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let err = Config::from_toml("[pools]\nio_workers = 0\n").unwrap_err();
        assert!(err.to_string().contains("io_workers"));
    }
}
