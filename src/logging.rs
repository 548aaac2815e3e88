// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The `--log-level` flag wins when given; otherwise the `CONFWATCH_LOG`
//! environment variable is parsed as a [`tracing::Level`] (so `warn`, `debug`
//! etc. all work), falling back to `info`. Output goes to stderr so change
//! reports on stdout stay machine-readable.

use anyhow::Result;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(level) => level.into(),
        None => std::env::var("CONFWATCH_LOG")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
