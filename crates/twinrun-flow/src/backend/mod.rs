//! Platform abstraction: queues, result storage, and compute functions.
//!
//! This module provides:
//!
//! - [`QueueService`]: Message queues with batch send, zero-wait receive, and acknowledgement
//! - [`ResultStore`]: Bulk lookup of worker result records
//! - [`ComputePlatform`]: Compute functions and queue-to-function bindings
//! - [`Platform`]: The three services bundled for a run
//!
//! Two implementations ship with the crate:
//!
//! - [`memory`]: In-process backend for tests and single-invocation runs
//! - [`local`]: Filesystem emulator that persists across invocations
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: Provisioning, dispatch, and drain only see these traits
//! - **Idempotent deletes**: Deleting an absent resource reports [`DeleteOutcome::AlreadyAbsent`]
//! - **Bounded batches**: Sends and receives never exceed [`MAX_BATCH_SIZE`] messages

pub mod local;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use twinrun_core::config::{BackendConfig, FunctionRuntime};
use twinrun_core::id::{MessageId, ResultId};

use crate::error::Result;
use crate::record::ResultRecord;

/// Maximum number of messages in one send or receive call.
pub const MAX_BATCH_SIZE: usize = 10;

/// Default time a received message stays invisible to other consumers.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix the platform requires on ordered queue names.
pub const ORDERED_QUEUE_SUFFIX: &str = ".fifo";

/// Options for queue creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Ordered (FIFO) queue with content-based deduplication.
    pub ordered: bool,
    /// Time a received message stays invisible.
    pub visibility_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            ordered: false,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

impl QueueOptions {
    /// Options for an ordered queue.
    #[must_use]
    pub fn ordered() -> Self {
        Self {
            ordered: true,
            ..Self::default()
        }
    }
}

/// A created queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHandle {
    /// Queue URL used for every queue call.
    pub url: String,
    /// Resource name used when binding the queue to a function.
    pub arn: String,
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Batch-entry ID, unique within the batch.
    pub id: MessageId,
    /// Message body.
    pub body: String,
    /// Ordering group; required for ordered queues, absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue-assigned message ID.
    pub message_id: String,
    /// Handle used to delete this delivery.
    pub receipt_handle: String,
    /// Message body.
    pub body: String,
}

/// An acknowledgement entry for [`QueueService::delete_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Queue-assigned message ID.
    pub message_id: String,
    /// Receipt handle of the delivery.
    pub receipt_handle: String,
}

/// Outcome of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The resource existed and was deleted.
    Deleted,
    /// The resource did not exist.
    AlreadyAbsent,
}

/// Message queue service.
///
/// All methods are `Send + Sync`; implementations are shared behind `Arc`.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Lists the URLs of queues whose name starts with `name_prefix`.
    async fn find_queues(&self, name_prefix: &str) -> Result<Vec<String>>;

    /// Creates a queue. Ordered queue names get [`ORDERED_QUEUE_SUFFIX`] appended.
    async fn create_queue(&self, name: &str, options: &QueueOptions) -> Result<QueueHandle>;

    /// Returns the bindable resource name of an existing queue.
    async fn queue_arn(&self, url: &str) -> Result<String>;

    /// Removes every message from a queue.
    async fn purge_queue(&self, url: &str) -> Result<()>;

    /// Deletes a queue.
    async fn delete_queue(&self, url: &str) -> Result<DeleteOutcome>;

    /// Sends up to [`MAX_BATCH_SIZE`] messages.
    async fn send_batch(&self, url: &str, messages: Vec<OutboundMessage>) -> Result<()>;

    /// Receives up to `max_messages` visible messages without waiting.
    ///
    /// Received messages stay invisible for `visibility_timeout` and are
    /// delivered again unless deleted first.
    async fn receive(
        &self,
        url: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Deletes delivered messages. Stale receipts are ignored.
    async fn delete_batch(&self, url: &str, entries: Vec<DeleteEntry>) -> Result<()>;
}

/// Result record storage.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fetches the records with the given keys. Missing keys are omitted.
    async fn batch_get(&self, table: &str, keys: &[ResultId]) -> Result<Vec<ResultRecord>>;

    /// Writes a record. Used by workers; the comparison core only reads.
    async fn put(&self, table: &str, record: ResultRecord) -> Result<()>;
}

/// Shared filesystem attached to a compute function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedMountSpec {
    /// Access point resource name.
    pub access_point: String,
    /// Mount path inside the function.
    pub mount_path: PathBuf,
}

/// Everything needed to create a compute function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// Packaged artifact.
    pub artifact: PathBuf,
    /// Runtime settings.
    pub runtime: FunctionRuntime,
    /// Execution role.
    pub role: String,
    /// Shared filesystem mount.
    pub shared_mount: Option<SharedMountSpec>,
    /// Network subnets.
    pub subnet_ids: Vec<String>,
    /// Network security groups.
    pub security_group_ids: Vec<String>,
}

/// Compute platform running worker functions.
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Creates a function and returns its stable identifier.
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String>;

    /// Binds a queue to a function so each message batch invokes it.
    /// Returns the binding identifier.
    async fn bind_queue(
        &self,
        function_name: &str,
        queue_arn: &str,
        batch_size: usize,
    ) -> Result<String>;

    /// Deletes a function by identifier.
    async fn delete_function(&self, function_id: &str) -> Result<DeleteOutcome>;

    /// Deletes a queue binding by identifier.
    async fn delete_binding(&self, binding_id: &str) -> Result<DeleteOutcome>;
}

/// The platform services used by a run.
#[derive(Clone)]
pub struct Platform {
    /// Queue service.
    pub queues: Arc<dyn QueueService>,
    /// Result store.
    pub results: Arc<dyn ResultStore>,
    /// Compute platform.
    pub compute: Arc<dyn ComputePlatform>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("queues", &"<QueueService>")
            .field("results", &"<ResultStore>")
            .field("compute", &"<ComputePlatform>")
            .finish()
    }
}

impl Platform {
    /// Bundles three services.
    #[must_use]
    pub fn new(
        queues: Arc<dyn QueueService>,
        results: Arc<dyn ResultStore>,
        compute: Arc<dyn ComputePlatform>,
    ) -> Self {
        Self {
            queues,
            results,
            compute,
        }
    }

    /// Builds the platform selected by the configuration.
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::Local { root } => {
                let local = Arc::new(local::LocalPlatform::new(root.clone()));
                Self::new(local.clone(), local.clone(), local)
            }
            BackendConfig::Memory => Self::new(
                Arc::new(memory::InMemoryQueueService::new()),
                Arc::new(memory::InMemoryResultStore::new()),
                Arc::new(memory::InMemoryComputePlatform::new()),
            ),
        }
    }
}

/// Returns the queue name encoded at the end of a queue URL.
#[must_use]
pub fn queue_name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Returns true if the queue URL names an ordered queue.
#[must_use]
pub fn is_ordered_queue(url: &str) -> bool {
    url.ends_with(ORDERED_QUEUE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_url_helpers() {
        assert_eq!(queue_name_from_url("local://queues/exp42_test"), "exp42_test");
        assert_eq!(queue_name_from_url("bare"), "bare");
        assert!(is_ordered_queue("memory://queues/exp42_test.fifo"));
        assert!(!is_ordered_queue("memory://queues/exp42_test"));
    }

    #[test]
    fn queue_options_defaults() {
        let options = QueueOptions::default();
        assert!(!options.ordered);
        assert_eq!(options.visibility_timeout, Duration::from_secs(30));
        assert!(QueueOptions::ordered().ordered);
    }

    #[test]
    fn outbound_message_omits_missing_group() {
        let message = OutboundMessage {
            id: MessageId::generate(),
            body: "item-1".into(),
            group_id: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("group_id").is_none());
    }
}
