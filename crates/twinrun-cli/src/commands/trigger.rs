//! Trigger command - send work items to both input queues.

use anyhow::{Context, Result};

use super::Session;
use crate::{output, Commands, Config};

/// Execute the trigger command.
///
/// # Errors
///
/// Returns an error if the ledger or item list cannot be read, or a batch
/// cannot be sent.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config, Commands::Trigger)?;
    let summary = session
        .phases()
        .trigger()
        .await
        .context("Failed to push work items")?;
    print!("{}", output::dispatch(&summary, &config.format)?);
    Ok(())
}
