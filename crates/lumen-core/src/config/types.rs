//! Sub-configuration structs with their defaults.

use crate::filter::EffectKind;
use serde::{Deserialize, Serialize};

/// Sizes of the execution pools shared by every scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Max concurrent fetches
    pub io_workers: usize,

    /// Threads in the CPU pool used by filter effects
    pub cpu_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            io_workers: 4,
            cpu_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum payload size in megabytes
    pub max_download_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Transfer timeout in milliseconds. Unset means no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_download_mb: 50,
            max_image_dimension: 10000,
            fetch_timeout_ms: None,
        }
    }
}

impl LimitsConfig {
    /// Download limit in bytes.
    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_mb.saturating_mul(1024 * 1024)
    }
}

/// Fetch transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User-Agent header sent on HTTP requests
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("lumen/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Filter effect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Effect applied by the filter stage
    pub effect: EffectKind,

    /// Block edge in pixels for the pixelate effect
    pub block_size: u32,

    /// Blend factor for the sepia effect (0.0 - 1.0)
    pub intensity: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            effect: EffectKind::Pixelate,
            block_size: 8,
            intensity: 1.0,
        }
    }
}

/// User-visible error reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Language tag used to pick the error message ("en", "de", "pt-BR", ...)
    pub locale: String,

    /// Replaces the built-in message for every locale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            message: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: pretty or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
