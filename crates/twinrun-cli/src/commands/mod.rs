//! CLI command implementations.

pub mod all;
pub mod cleanup;
pub mod deploy;
pub mod reduce;
pub mod trigger;

use anyhow::{Context, Result};

use twinrun_core::config::{BackendConfig, RunConfig};
use twinrun_flow::artifact::CommandArtifactBuilder;
use twinrun_flow::backend::Platform;
use twinrun_flow::runner::ComparisonRun;

use crate::progress::ConsoleProgress;
use crate::{Commands, Config, OutputFormat};

/// Everything a command needs to drive one run.
pub struct Session {
    /// Validated run configuration.
    pub run_config: RunConfig,
    /// Platform selected by the configuration.
    pub platform: Platform,
    /// Artifact builder.
    pub builder: CommandArtifactBuilder,
    /// Progress output.
    pub progress: ConsoleProgress,
}

impl Session {
    /// Loads the configuration and builds the platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the artifact
    /// builder cannot be created.
    pub fn open(config: &Config, command: Commands) -> Result<Self> {
        let run_config = config.load_run_config()?;
        if run_config.deploy().backend == BackendConfig::Memory && spans_invocations(command) {
            tracing::warn!(
                ?command,
                "memory backend does not persist between invocations; use `all` or the local backend"
            );
        }
        let platform = Platform::from_config(&run_config.deploy().backend);
        let builder = CommandArtifactBuilder::new(run_config.deploy().handler_template.clone())
            .context("Failed to initialize artifact builder")?;
        let progress = if config.format == OutputFormat::Json {
            ConsoleProgress::quiet()
        } else {
            ConsoleProgress::new()
        };
        Ok(Self {
            run_config,
            platform,
            builder,
            progress,
        })
    }

    /// Phases of the configured run.
    #[must_use]
    pub fn phases(&self) -> ComparisonRun<'_> {
        ComparisonRun::new(&self.run_config, &self.platform, &self.builder, &self.progress)
    }
}

/// Returns true if the command depends on state left by another invocation.
#[must_use]
pub const fn spans_invocations(command: Commands) -> bool {
    match command {
        Commands::Deploy | Commands::Trigger | Commands::Reduce | Commands::Cleanup => true,
        Commands::All => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_all_runs_within_one_invocation() {
        assert!(!spans_invocations(Commands::All));
        for command in [
            Commands::Deploy,
            Commands::Trigger,
            Commands::Reduce,
            Commands::Cleanup,
        ] {
            assert!(spans_invocations(command), "{command:?}");
        }
    }
}
