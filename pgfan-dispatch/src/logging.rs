//! Logging setup for pgfan.
//!
//! Library code logs through the `tracing` macros only. Applications that do
//! not install their own subscriber can call [`init`] once at startup, which
//! reads its settings from the environment:
//!
//! - `PGFAN_DEBUG=true|1|yes` - enable debug logging
//! - `PGFAN_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `PGFAN_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! Installing the subscriber requires the `tracing-subscriber` feature;
//! without it the functions here only report the configured settings.
//!
//! ```rust,no_run
//! use pgfan_dispatch::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Check if debug logging is enabled via `PGFAN_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("PGFAN_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Normalize a level name, returning `None` for anything unrecognized.
pub fn parse_level(level: &str) -> Option<&'static str> {
    let level = level.trim().to_lowercase();
    LEVELS.iter().copied().find(|l| *l == level)
}

/// The configured log level.
///
/// `PGFAN_LOG_LEVEL` wins when it names a valid level; otherwise "debug" if
/// `PGFAN_DEBUG` is set and "warn" if not.
pub fn get_log_level() -> &'static str {
    env::var("PGFAN_LOG_LEVEL")
        .ok()
        .and_then(|l| parse_level(&l))
        .unwrap_or(if is_debug_enabled() { "debug" } else { "warn" })
}

/// The configured output format.
pub fn get_log_format() -> &'static str {
    env::var("PGFAN_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize logging from the environment.
///
/// Does nothing unless `PGFAN_DEBUG` or `PGFAN_LOG_LEVEL` is set. Only the
/// first call to any `init*` function has an effect.
pub fn init() {
    if !is_debug_enabled() && env::var("PGFAN_LOG_LEVEL").is_err() {
        return;
    }
    install(get_log_level(), get_log_format());
}

/// Initialize logging at an explicit level, ignoring `PGFAN_LOG_LEVEL`.
///
/// Unknown level names fall back to "warn".
pub fn init_with_level(level: &str) {
    install(parse_level(level).unwrap_or("warn"), get_log_format());
}

/// Initialize debug-level logging.
pub fn init_debug() {
    install("debug", get_log_format());
}

fn install(level: &'static str, format: &'static str) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(format!(
                "pgfan={level},pgfan_dispatch={level},pgfan_postgres={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match format {
                "pretty" => registry.with(fmt::layer().pretty()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().json()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format, "pgfan logging initialized");
            }
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        {
            let _ = (level, format);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Some("debug"));
        assert_eq!(parse_level(" warn "), Some("warn"));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_log_level_default() {
        // SAFETY: no other test in this crate reads these variables.
        unsafe {
            env::remove_var("PGFAN_DEBUG");
            env::remove_var("PGFAN_LOG_LEVEL");
        }
        assert!(!is_debug_enabled());
        assert_eq!(get_log_level(), "warn");
    }
}
