//! Logging setup for the `solarlink` binary and helpers for library call sites.
//!
//! Library code logs through the `log` facade. The binary installs `env_logger`,
//! so `RUST_LOG` controls verbosity as usual.

use log::{debug, error, info, log_enabled, warn, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes `env_logger`, defaulting to `debug` when `verbose` is set and
/// `info` otherwise. An explicit `RUST_LOG` still wins.
///
/// Calling it twice is harmless; the second call only logs a debug line.
pub fn init_logger_with(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(default).parse_default_env();
    if builder.try_init().is_err() {
        debug!("Logger already initialized");
    }
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}
