//! Reduce command - collect results and print the comparison report.

use anyhow::{Context, Result};

use super::Session;
use crate::{output, Commands, Config};

/// Execute the reduce command.
///
/// The report is printed even when the drain fails or times out.
///
/// # Errors
///
/// Returns an error if the ledger or item list cannot be read, or the drain
/// stopped on a transport failure.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config, Commands::Reduce)?;
    let output = session
        .phases()
        .reduce()
        .await
        .context("Failed to start result collection")?;
    print!(
        "{}",
        output::reduce(&output, session.run_config.idle_threshold(), &config.format)?
    );
    match output.result {
        Ok(_) => Ok(()),
        Err(e) => Err(e).context("Result collection stopped early"),
    }
}
