//! Twinrun CLI - A/B comparison runs from the command line.
//!
//! The main entry point for the `twinrun` binary.

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use owo_colors::OwoColorize;

use twinrun_cli::Cli;
use twinrun_core::observability::init_logging;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_logging(cli.log_format.into(), cli.log_directive());
    let config = cli.config();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(twinrun_cli::run(cli.command, &config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
