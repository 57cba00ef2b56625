//! Deployment ledger.
//!
//! Every external resource a run creates is appended to the ledger before the
//! next provisioning step begins. The ledger is persisted to
//! `<workspace>/deployed_list.json` as a JSON array of `[kind, identifier]`
//! pairs, and teardown pops entries as it deletes them, so the file on disk
//! always lists exactly the resources that may still exist.
//!
//! ```json
//! [
//!   [
//!     "sqs_queue",
//!     "local://queues/exp42_completion"
//!   ]
//! ]
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use twinrun_core::id::TaskId;

use crate::backend::queue_name_from_url;
use crate::error::{Error, Result};

/// Kind of an externally provisioned resource.
///
/// Serialized names are part of the persisted ledger format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A local directory tree (source checkout, package, build directory).
    #[serde(rename = "local_files")]
    LocalArtifact,
    /// A compute function.
    #[serde(rename = "lambda_func")]
    ComputeFunction,
    /// A message queue (input or completion).
    #[serde(rename = "sqs_queue")]
    Queue,
    /// A binding that invokes a compute function for every queue message.
    #[serde(rename = "lambda_sqs_mapping")]
    QueueBinding,
    /// A stored data table. Recorded for bookkeeping only.
    #[serde(rename = "dynamodb")]
    DataTable,
    /// A dependency directory on the shared mount. Recorded for bookkeeping only.
    #[serde(rename = "efs_mount")]
    SharedMount,
}

impl ResourceKind {
    /// Returns the persisted name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalArtifact => "local_files",
            Self::ComputeFunction => "lambda_func",
            Self::Queue => "sqs_queue",
            Self::QueueBinding => "lambda_sqs_mapping",
            Self::DataTable => "dynamodb",
            Self::SharedMount => "efs_mount",
        }
    }

    /// Returns true if teardown skips this kind without deleting anything.
    #[must_use]
    pub const fn is_marker(self) -> bool {
        matches!(self, Self::DataTable | Self::SharedMount)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(ResourceKind, String)", into = "(ResourceKind, String)")]
pub struct DeploymentRecord {
    /// Kind of resource.
    pub kind: ResourceKind,
    /// Platform identifier or local path.
    pub identifier: String,
}

impl DeploymentRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Returns true if this record is `task`'s completion queue.
    #[must_use]
    pub fn is_completion_queue(&self, task: &TaskId) -> bool {
        self.kind == ResourceKind::Queue
            && queue_name_from_url(&self.identifier) == task.completion_queue_name()
    }
}

impl From<(ResourceKind, String)> for DeploymentRecord {
    fn from((kind, identifier): (ResourceKind, String)) -> Self {
        Self { kind, identifier }
    }
}

impl From<DeploymentRecord> for (ResourceKind, String) {
    fn from(record: DeploymentRecord) -> Self {
        (record.kind, record.identifier)
    }
}

/// Ordered, persisted record of a run's external resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    path: PathBuf,
    entries: VecDeque<DeploymentRecord>,
}

impl Ledger {
    /// Creates an empty ledger persisted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: VecDeque::new(),
        }
    }

    /// Loads a persisted ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found("ledger", path.display().to_string())
            } else {
                Error::storage_with_source(format!("failed to read {}", path.display()), e)
            }
        })?;
        let entries: VecDeque<DeploymentRecord> =
            serde_json::from_str(&content).map_err(|e| Error::Serialization {
                message: format!("failed to parse ledger {}: {e}", path.display()),
            })?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "loaded ledger");
        Ok(Self { path, entries })
    }

    /// Path the ledger is persisted to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record for a resource that now exists.
    pub fn record(&mut self, kind: ResourceKind, identifier: impl Into<String>) {
        let record = DeploymentRecord::new(kind, identifier);
        tracing::debug!(kind = %record.kind, identifier = %record.identifier, "recorded resource");
        self.entries.push_back(record);
    }

    /// Returns true if an identical record is already listed.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, identifier: &str) -> bool {
        self.entries
            .iter()
            .any(|r| r.kind == kind && r.identifier == identifier)
    }

    /// Writes the ledger to disk, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| Error::Serialization {
            message: format!("failed to serialize ledger: {e}"),
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::storage_with_source(format!("failed to create {}", parent.display()), e)
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            Error::storage_with_source(format!("failed to write {}", tmp.display()), e)
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::storage_with_source(format!("failed to replace {}", self.path.display()), e)
        })?;
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "persisted ledger");
        Ok(())
    }

    /// Entries in creation order.
    pub fn entries(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn front(&self) -> Option<&DeploymentRecord> {
        self.entries.front()
    }

    pub(crate) fn back(&self) -> Option<&DeploymentRecord> {
        self.entries.back()
    }

    pub(crate) fn pop_front(&mut self) -> Option<DeploymentRecord> {
        self.entries.pop_front()
    }

    pub(crate) fn pop_back(&mut self) -> Option<DeploymentRecord> {
        self.entries.pop_back()
    }

    /// Identifiers of `task`'s input queues, in first-recorded order.
    ///
    /// A queue recorded by more than one deploy is listed once.
    #[must_use]
    pub fn input_queues(&self, task: &TaskId) -> Vec<&str> {
        let mut queues: Vec<&str> = Vec::new();
        for record in &self.entries {
            if record.kind == ResourceKind::Queue
                && !record.is_completion_queue(task)
                && !queues.contains(&record.identifier.as_str())
            {
                queues.push(&record.identifier);
            }
        }
        queues
    }

    /// Identifier of the completion queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the ledger lists no completion queue.
    pub fn completion_queue(&self, task: &TaskId) -> Result<&str> {
        self.entries
            .iter()
            .find(|r| r.is_completion_queue(task))
            .map(|r| r.identifier.as_str())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "ledger {} lists no completion queue; run deploy first",
                    self.path.display()
                ))
            })
    }
}
