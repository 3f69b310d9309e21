//! Error types for the Lumen image pipeline.
//!
//! Errors are organized by stage so a failure names the URL or buffer it
//! concerns. Cancellation is carried as [`PipelineError::Cancelled`] but is
//! never turned into a [`FailureRecord`].

use std::fmt;
use thiserror::Error;

/// Top-level error type for Lumen operations.
#[derive(Error, Debug)]
pub enum LumenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The CPU pool could not be started
    #[error("Failed to build CPU pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Failures of the fetch stage.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    /// Host or file could not be reached
    #[error("Cannot reach {url}: {message}")]
    Unreachable { url: String, message: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// Transfer broke off after the stream was opened
    #[error("Transfer interrupted for {url}: {message}")]
    Interrupted { url: String, message: String },

    /// Payload exceeds the download limit
    #[error("Payload too large: {url} ({size} bytes > {max} bytes)")]
    TooLarge { url: String, size: u64, max: u64 },

    /// Bytes are not a decodable image
    #[error("Cannot decode image from {url}: {message}")]
    Undecodable { url: String, message: String },

    /// Image dimensions exceed limit
    #[error("Image too large: {url} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        url: String,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Transfer exceeded the configured timeout
    #[error("Timeout fetching {url} after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
}

/// Failures of the filter stage.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Buffer geometry does not describe an RGBA image
    #[error("Malformed image buffer ({width}x{height}, {len} bytes)")]
    Malformed { width: u32, height: u32, len: usize },

    /// The effect refused to produce an output image
    #[error("Effect '{effect}' produced no image")]
    EffectFailed { effect: String },
}

/// Errors surfaced by a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Work panicked or its worker went away
    #[error("Internal error: {0}")]
    Internal(String),

    /// The owning scope was cancelled. Not a failure.
    #[error("Cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether this error is a cooperative abort rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Convert into a reportable record. Returns `None` for cancellation.
    pub fn to_failure(&self) -> Option<FailureRecord> {
        let cause = match self {
            PipelineError::Fetch(_) => FailureCause::Fetch,
            PipelineError::Filter(_) => FailureCause::Filter,
            PipelineError::Internal(_) => FailureCause::Internal,
            PipelineError::Cancelled => return None,
        };
        Some(FailureRecord {
            cause,
            message: self.to_string(),
        })
    }
}

/// Which part of a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Fetch,
    Filter,
    Internal,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCause::Fetch => "fetch",
            FailureCause::Filter => "filter",
            FailureCause::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Terminal failure of one run, as delivered to the scope's failure handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub cause: FailureCause,
    /// Technical detail; logged, never shown to the user verbatim
    pub message: String,
}

/// Convenience type alias for Lumen results.
pub type Result<T> = std::result::Result<T, LumenError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_has_no_failure_record() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(PipelineError::Cancelled.to_failure().is_none());
    }

    #[test]
    fn test_fetch_error_maps_to_fetch_cause() {
        let err: PipelineError = FetchError::Status {
            url: "http://example.com/a.png".to_string(),
            status: 404,
        }
        .into();
        let record = err.to_failure().unwrap();
        assert_eq!(record.cause, FailureCause::Fetch);
        assert!(record.message.contains("404"));
    }

    #[test]
    fn test_filter_error_maps_to_filter_cause() {
        let err: PipelineError = FilterError::Malformed {
            width: 0,
            height: 10,
            len: 0,
        }
        .into();
        assert_eq!(err.to_failure().unwrap().cause, FailureCause::Filter);
    }
}
