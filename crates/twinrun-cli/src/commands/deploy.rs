//! Deploy command - provision both variant pipelines.

use anyhow::{Context, Result};

use super::Session;
use crate::{output, Commands, Config};

/// Execute the deploy command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or provisioning fails.
/// Resources created before a failure stay in the ledger for `cleanup`.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config, Commands::Deploy)?;
    let run = session.phases().deploy().await.with_context(|| {
        format!(
            "Deploy failed; run `twinrun cleanup` to remove resources listed in {}",
            session.phases().workspace().ledger_path().display()
        )
    })?;
    print!("{}", output::provisioned(&run, &config.format)?);
    Ok(())
}
