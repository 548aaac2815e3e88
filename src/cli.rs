// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `confwatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "confwatch",
    version,
    about = "Resolve which linter config governs each source file, and watch it for changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Source files to resolve configs for and keep watching.
    #[arg(value_name = "FILE")]
    pub files: Vec<String>,

    /// Use this config file for every input instead of searching ancestors.
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<String>,

    /// Treat input as coming from stdin: resolve the config governing the
    /// current working directory.
    #[arg(long)]
    pub stdin: bool,

    /// Resolve once and exit without watching for changes.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CONFWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
