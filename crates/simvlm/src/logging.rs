//! Logging initialization.
//!
//! Logs always go to stderr; stdout carries command output (keys, JSON stats)
//! so it can be piped.

use simvlm_core::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `level` is used unless `RUST_LOG` is set.
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

/// Initialize from the `[logging]` section, with command-line overrides.
pub fn init_from_config(config: &LoggingConfig, verbose: bool, json_logs: bool) {
    let level = effective_level(config, verbose);
    let json_format = json_logs || config.format == "json";
    init(level, json_format);
}

/// `--verbose` raises the level to debug but never lowers a trace setting.
fn effective_level(config: &LoggingConfig, verbose: bool) -> &str {
    match config.level.as_str() {
        "trace" => "trace",
        _ if verbose => "debug",
        level => level,
    }
}
