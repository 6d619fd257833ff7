// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runguard`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runguard",
    version,
    about = "Run a reporting task on a schedule, one run at a time, with scoped credentials.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Runguard.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Runguard.toml")]
    pub config: String,

    /// Run the task once now (manual trigger) and exit with its result.
    #[arg(long, conflicts_with = "prune")]
    pub once: bool,

    /// Delete diagnostics bundles past the retention window and exit.
    #[arg(long)]
    pub prune: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNGUARD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the effective settings, but don't run
    /// anything. Secret values are never printed.
    #[arg(long)]
    pub dry_run: bool,
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
