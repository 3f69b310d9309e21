//! Logging initialization.
//!
//! Logs go to stderr; stdout carries the command's own output.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init(level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Initialize logging from the `[logging]` section, with CLI overrides.
pub fn init_from_config(config: &lumen_core::Config, verbose: bool, json_logs: bool) {
    let (level, json_format) = resolve(&config.logging, verbose, json_logs);
    init(level, json_format);
}

/// Effective level and format. `--verbose` only ever raises the level.
fn resolve(
    logging: &lumen_core::config::LoggingConfig,
    verbose: bool,
    json_logs: bool,
) -> (&str, bool) {
    let level = match logging.level.as_str() {
        "trace" => "trace",
        _ if verbose => "debug",
        "error" | "warn" | "info" | "debug" => logging.level.as_str(),
        _ => "info",
    };
    (level, json_logs || logging.format == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::config::LoggingConfig;

    fn logging(level: &str, format: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: format.to_string(),
        }
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(resolve(&logging("warn", "pretty"), true, false), ("debug", false));
        assert_eq!(resolve(&logging("trace", "pretty"), true, false), ("trace", false));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(resolve(&logging("loud", "pretty"), false, false).0, "info");
    }

    #[test]
    fn test_json_from_config_or_flag() {
        assert!(resolve(&logging("info", "json"), false, false).1);
        assert!(resolve(&logging("info", "pretty"), false, true).1);
    }
}
