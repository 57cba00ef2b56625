//! # twinrun-cli
//!
//! Command-line interface for twinrun comparison runs.
//!
//! ## Commands
//!
//! - `twinrun deploy` - Provision both variant pipelines and the completion queue
//! - `twinrun trigger` - Send the run's work items to both input queues
//! - `twinrun reduce` - Collect results and print the field-level diff report
//! - `twinrun cleanup` - Delete every resource recorded in the ledger
//! - `twinrun all` - Run the four phases in sequence, always cleaning up
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `TWINRUN_DEPLOY_CONFIG` - Environment settings (default: `deploy_config.json`)
//! - `TWINRUN_TASK_CONFIG` - Run description (default: `task_config.json`)
//! - `RUST_LOG` - Log filter, overriding `--verbose`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod output;
pub mod progress;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use twinrun_core::config::RunConfig;
use twinrun_core::observability::LogFormat;

/// twinrun - A/B comparison runner.
#[derive(Debug, Parser)]
#[command(name = "twinrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Environment settings file.
    #[arg(long, env = "TWINRUN_DEPLOY_CONFIG", default_value = "deploy_config.json")]
    pub deploy_config: PathBuf,

    /// Run description file.
    #[arg(long, env = "TWINRUN_TASK_CONFIG", default_value = "task_config.json")]
    pub task_config: PathBuf,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Log output format.
    #[arg(long, default_value = "compact")]
    pub log_format: LogFormatArg,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            deploy_config: self.deploy_config.clone(),
            task_config: self.task_config.clone(),
            format: self.format.clone(),
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Provision both variant pipelines.
    Deploy,
    /// Send work items to both input queues.
    Trigger,
    /// Collect and compare results.
    Reduce,
    /// Delete every deployed resource.
    Cleanup,
    /// Deploy, trigger, reduce, and clean up.
    All,
}

/// Output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Single-line logs.
    #[default]
    Compact,
    /// Multi-line logs.
    Pretty,
    /// JSON logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Compact => Self::Compact,
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Environment settings file.
    pub deploy_config: PathBuf,
    /// Run description file.
    pub task_config: PathBuf,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Loads and validates the run configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing, malformed, or invalid.
    pub fn load_run_config(&self) -> Result<RunConfig> {
        RunConfig::load(&self.deploy_config, &self.task_config).with_context(|| {
            format!(
                "Failed to load configuration from {} and {}",
                self.deploy_config.display(),
                self.task_config.display()
            )
        })
    }
}

/// Executes one subcommand.
///
/// # Errors
///
/// Returns the first error of the executed phase.
pub async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Deploy => commands::deploy::execute(config).await,
        Commands::Trigger => commands::trigger::execute(config).await,
        Commands::Reduce => commands::reduce::execute(config).await,
        Commands::Cleanup => commands::cleanup::execute(config).await,
        Commands::All => commands::all::execute(config).await,
    }
}
