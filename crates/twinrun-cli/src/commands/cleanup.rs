//! Cleanup command - delete every deployed resource.

use anyhow::{Context, Result};

use super::Session;
use crate::{output, Commands, Config};

/// Execute the cleanup command.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read or a deletion fails. The
/// ledger then lists the resources that remain; rerun to retry them.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config, Commands::Cleanup)?;
    let summary = session
        .phases()
        .cleanup()
        .await
        .context("Cleanup stopped; rerun `twinrun cleanup` to retry the remaining resources")?;
    print!("{}", output::teardown(&summary, &config.format)?);
    Ok(())
}
