//! Offline stand-ins for the artifact builder and progress reporting.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use twinrun_core::config::VariantSource;
use twinrun_flow::artifact::{ArtifactBuilder, HandlerContext, HANDLER_DESCRIPTOR_FILE_NAME};
use twinrun_flow::error::{Error, Result};
use twinrun_flow::progress::ProgressSink;

/// Artifact build operation, used for recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOp {
    /// Source checkout.
    FetchSource,
    /// Support file download.
    FetchFiles,
    /// Handler generation.
    GenerateHandler,
    /// Packaging.
    Package,
    /// Dependency installation.
    InstallDependencies,
}

/// Artifact builder that writes placeholder files instead of running tools.
#[derive(Debug, Default)]
pub struct StubArtifactBuilder {
    calls: Mutex<Vec<(BuildOp, PathBuf)>>,
    fail_on: Mutex<Option<BuildOp>>,
}

impl StubArtifactBuilder {
    /// Creates a builder that succeeds on every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `op` fail.
    pub fn fail_on(&self, op: BuildOp) {
        *self.fail_on.lock().expect("lock") = Some(op);
    }

    /// Returns the recorded calls with the path each one targeted.
    pub fn calls(&self) -> Vec<(BuildOp, PathBuf)> {
        self.calls.lock().expect("lock").clone()
    }

    fn enter(&self, op: BuildOp, path: &Path) -> Result<()> {
        self.calls.lock().expect("lock").push((op, path.to_path_buf()));
        if *self.fail_on.lock().expect("lock") == Some(op) {
            return Err(Error::artifact("stub", format!("injected failure in {op:?}")));
        }
        Ok(())
    }
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage_with_source("mkdir", e))?;
    }
    std::fs::write(path, contents).map_err(|e| Error::storage_with_source("write", e))
}

#[async_trait]
impl ArtifactBuilder for StubArtifactBuilder {
    async fn fetch_source(&self, source: &VariantSource, dest: &Path) -> Result<()> {
        self.enter(BuildOp::FetchSource, dest)?;
        write(&dest.join("SOURCE"), &format!("{}#{}", source.git, source.branch))
    }

    async fn fetch_files(&self, urls: &[String], dest: &Path) -> Result<()> {
        self.enter(BuildOp::FetchFiles, dest)?;
        for url in urls {
            let name = url.rsplit('/').next().unwrap_or(url);
            write(&dest.join(name), url)?;
        }
        Ok(())
    }

    async fn generate_handler(&self, context: &HandlerContext, dest: &Path) -> Result<PathBuf> {
        self.enter(BuildOp::GenerateHandler, dest)?;
        let path = dest.join(HANDLER_DESCRIPTOR_FILE_NAME);
        let body = serde_json::to_string(context).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })?;
        write(&path, &body)?;
        Ok(path)
    }

    async fn package(&self, package_dir: &Path, artifact: &Path) -> Result<()> {
        self.enter(BuildOp::Package, artifact)?;
        write(artifact, &package_dir.display().to_string())
    }

    async fn install_dependencies(
        &self,
        _python: &str,
        _package_dir: &Path,
        lib_location: &Path,
    ) -> Result<()> {
        self.enter(BuildOp::InstallDependencies, lib_location)?;
        std::fs::create_dir_all(lib_location).map_err(|e| Error::storage_with_source("mkdir", e))
    }
}

/// A progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A phase message.
    Phase(String),
    /// A counter update.
    Advance {
        /// Units done.
        done: usize,
        /// Units expected.
        total: usize,
        /// Unit label.
        unit: String,
    },
}

/// Progress sink that records every event.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("lock").clone()
    }

    /// Returns the recorded phase messages.
    pub fn phases(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Phase(message) => Some(message),
                ProgressEvent::Advance { .. } => None,
            })
            .collect()
    }

    /// Returns the last counter update for `unit`.
    pub fn last_advance(&self, unit: &str) -> Option<(usize, usize)> {
        self.events().into_iter().rev().find_map(|e| match e {
            ProgressEvent::Advance { done, total, unit: u } if u == unit => Some((done, total)),
            _ => None,
        })
    }
}

impl ProgressSink for RecordingProgress {
    fn phase(&self, message: &str) {
        self.events
            .lock()
            .expect("lock")
            .push(ProgressEvent::Phase(message.to_string()));
    }

    fn advance(&self, done: usize, total: usize, unit: &str) {
        self.events.lock().expect("lock").push(ProgressEvent::Advance {
            done,
            total,
            unit: unit.to_string(),
        });
    }
}
