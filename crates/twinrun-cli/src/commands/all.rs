//! All command - deploy, trigger, reduce, and clean up in one invocation.

use anyhow::{Context, Result};

use super::Session;
use crate::{output, Commands, Config};

/// Execute the all command.
///
/// Cleanup runs even when an earlier phase fails.
///
/// # Errors
///
/// Returns the first phase error, or the drain error if only the drain failed.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config, Commands::All)?;
    let mut report = session.phases().all().await;
    print!(
        "{}",
        output::full_run(&report, session.run_config.idle_threshold(), &config.format)?
    );
    if let Some(e) = report.error.take() {
        return Err(e).context("Comparison run failed");
    }
    if let Some(output) = report.reduce.take() {
        if let Err(e) = output.result {
            return Err(e).context("Result collection stopped early");
        }
    }
    Ok(())
}
