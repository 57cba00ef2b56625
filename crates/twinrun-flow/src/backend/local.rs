//! Filesystem emulator of the platform services.
//!
//! All state lives under one root directory, so separate CLI invocations
//! (deploy, trigger, reduce, cleanup) and external worker processes observe
//! the same queues and tables:
//!
//! ```text
//! <root>/
//!   queues/<name>/meta.json
//!   queues/<name>/ready/<message_id>.json
//!   queues/<name>/inflight/<receipt>.json
//!   tables/<table>/<result_id>.json
//!   functions/<name>.json
//!   bindings/<binding_id>.json
//! ```
//!
//! Message IDs are ULIDs, so listing `ready/` in name order yields send
//! order. An in-flight lease records the wall-clock time at which the message
//! becomes visible again; expired leases are returned to `ready/` on the next
//! receive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use twinrun_core::id::ResultId;

use super::{
    queue_name_from_url, ComputePlatform, DeleteEntry, DeleteOutcome, FunctionSpec,
    OutboundMessage, QueueHandle, QueueOptions, QueueService, ReceivedMessage, ResultStore,
    MAX_BATCH_SIZE, ORDERED_QUEUE_SUFFIX,
};
use crate::error::{Error, Result};
use crate::record::ResultRecord;

/// URL scheme of emulated queues.
pub const LOCAL_QUEUE_SCHEME: &str = "local://queues/";

const FUNCTION_ID_PREFIX: &str = "local:function:";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueMeta {
    name: String,
    arn: String,
    ordered: bool,
    visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    message_id: String,
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Lease {
    visible_at_ms: i64,
    message: StoredMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct BindingRecord {
    function_name: String,
    queue_arn: String,
    batch_size: usize,
}

/// Platform services emulated on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalPlatform {
    root: PathBuf,
}

impl LocalPlatform {
    /// Creates a platform rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL of a queue with the given name.
    #[must_use]
    pub fn url_for(name: &str) -> String {
        format!("{LOCAL_QUEUE_SCHEME}{name}")
    }

    fn queues_dir(&self) -> PathBuf {
        self.root.join("queues")
    }

    fn queue_dir(&self, url: &str) -> Result<PathBuf> {
        let name = url
            .strip_prefix(LOCAL_QUEUE_SCHEME)
            .ok_or_else(|| Error::configuration(format!("'{url}' is not a local queue URL")))?;
        validate_segment("queue", name)?;
        Ok(self.queues_dir().join(name))
    }

    async fn existing_queue_dir(&self, url: &str) -> Result<PathBuf> {
        let dir = self.queue_dir(url)?;
        if tokio::fs::try_exists(dir.join("meta.json"))
            .await
            .map_err(|e| io_err("stat queue", &dir, e))?
        {
            Ok(dir)
        } else {
            Err(Error::not_found("queue", url))
        }
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf> {
        validate_segment("table", table)?;
        Ok(self.root.join("tables").join(table))
    }

    fn function_path(&self, name: &str) -> Result<PathBuf> {
        validate_segment("function", name)?;
        Ok(self.root.join("functions").join(format!("{name}.json")))
    }

    fn binding_path(&self, binding_id: &str) -> Result<PathBuf> {
        validate_segment("binding", binding_id)?;
        Ok(self.root.join("bindings").join(format!("{binding_id}.json")))
    }

    /// Enqueues a single message body, as a worker would.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist or the write fails.
    pub async fn push(&self, url: &str, body: impl Into<String> + Send) -> Result<()> {
        let dir = self.existing_queue_dir(url).await?;
        let message = StoredMessage {
            message_id: Ulid::new().to_string(),
            body: body.into(),
            group_id: None,
        };
        write_json(
            &dir.join("ready").join(format!("{}.json", message.message_id)),
            &message,
        )
        .await
    }

    /// Bodies of the visible messages, in send order, without receiving them.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist or cannot be read.
    pub async fn peek(&self, url: &str) -> Result<Vec<String>> {
        let dir = self.existing_queue_dir(url).await?;
        let mut bodies = Vec::new();
        for path in sorted_json_files(&dir.join("ready")).await? {
            let message: StoredMessage = read_json(&path).await?;
            bodies.push(message.body);
        }
        Ok(bodies)
    }

    /// Moves expired in-flight messages back to `ready/`.
    async fn release_expired(&self, dir: &Path) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        for path in sorted_json_files(&dir.join("inflight")).await? {
            let lease: Lease = match read_json(&path).await {
                Ok(lease) => lease,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if lease.visible_at_ms <= now {
                write_json(
                    &dir.join("ready")
                        .join(format!("{}.json", lease.message.message_id)),
                    &lease.message,
                )
                .await?;
                remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueService for LocalPlatform {
    async fn find_queues(&self, name_prefix: &str) -> Result<Vec<String>> {
        let dir = self.queues_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("list queues", &dir, e)),
        };
        let mut urls = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err("list queues", &dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(name_prefix) && entry.path().join("meta.json").exists() {
                urls.push(Self::url_for(&name));
            }
        }
        urls.sort();
        Ok(urls)
    }

    async fn create_queue(&self, name: &str, options: &QueueOptions) -> Result<QueueHandle> {
        let name = if options.ordered {
            format!("{name}{ORDERED_QUEUE_SUFFIX}")
        } else {
            name.to_string()
        };
        let url = Self::url_for(&name);
        let dir = self.queue_dir(&url)?;
        for sub in ["ready", "inflight"] {
            let path = dir.join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_err("create queue", &path, e))?;
        }
        let meta_path = dir.join("meta.json");
        let meta = match read_json::<QueueMeta>(&meta_path).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                let meta = QueueMeta {
                    arn: format!("local:queue:{name}"),
                    name,
                    ordered: options.ordered,
                    visibility_timeout_secs: options.visibility_timeout.as_secs(),
                };
                write_json(&meta_path, &meta).await?;
                meta
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(url = %url, "created local queue");
        Ok(QueueHandle { url, arn: meta.arn })
    }

    async fn queue_arn(&self, url: &str) -> Result<String> {
        let dir = self.existing_queue_dir(url).await?;
        let meta: QueueMeta = read_json(&dir.join("meta.json")).await?;
        Ok(meta.arn)
    }

    async fn purge_queue(&self, url: &str) -> Result<()> {
        let dir = self.existing_queue_dir(url).await?;
        for sub in ["ready", "inflight"] {
            let path = dir.join(sub);
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err("purge queue", &path, e)),
            }
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_err("purge queue", &path, e))?;
        }
        Ok(())
    }

    async fn delete_queue(&self, url: &str) -> Result<DeleteOutcome> {
        let dir = self.queue_dir(url)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(io_err("delete queue", &dir, e)),
        }
    }

    async fn send_batch(&self, url: &str, messages: Vec<OutboundMessage>) -> Result<()> {
        if messages.len() > MAX_BATCH_SIZE {
            return Err(Error::transport(
                "send_batch",
                format!("batch of {} exceeds limit {MAX_BATCH_SIZE}", messages.len()),
            ));
        }
        let dir = self.existing_queue_dir(url).await?;
        let ordered = queue_name_from_url(url).ends_with(ORDERED_QUEUE_SUFFIX);
        if messages.iter().any(|m| m.group_id.is_some() != ordered) {
            return Err(Error::transport(
                "send_batch",
                "group id must be set exactly for ordered queues",
            ));
        }
        for message in messages {
            let stored = StoredMessage {
                message_id: Ulid::new().to_string(),
                body: message.body,
                group_id: message.group_id,
            };
            write_json(
                &dir.join("ready").join(format!("{}.json", stored.message_id)),
                &stored,
            )
            .await?;
        }
        Ok(())
    }

    async fn receive(
        &self,
        url: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let dir = self.existing_queue_dir(url).await?;
        self.release_expired(&dir).await?;

        let visible_at_ms = Utc::now().timestamp_millis()
            + i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX / 2);
        let limit = max_messages.min(MAX_BATCH_SIZE);
        let mut received = Vec::new();
        for path in sorted_json_files(&dir.join("ready")).await? {
            if received.len() == limit {
                break;
            }
            let message: StoredMessage = match read_json(&path).await {
                Ok(message) => message,
                // Taken by a concurrent consumer.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let receipt = Ulid::new().to_string();
            write_json(
                &dir.join("inflight").join(format!("{receipt}.json")),
                &Lease {
                    visible_at_ms,
                    message: message.clone(),
                },
            )
            .await?;
            remove_file(&path).await?;
            received.push(ReceivedMessage {
                message_id: message.message_id,
                receipt_handle: receipt,
                body: message.body,
            });
        }
        Ok(received)
    }

    async fn delete_batch(&self, url: &str, entries: Vec<DeleteEntry>) -> Result<()> {
        let dir = self.existing_queue_dir(url).await?;
        for entry in entries {
            if validate_segment("receipt", &entry.receipt_handle).is_err() {
                tracing::warn!(receipt = %entry.receipt_handle, "ignoring malformed receipt");
                continue;
            }
            remove_file(&dir.join("inflight").join(format!("{}.json", entry.receipt_handle)))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for LocalPlatform {
    async fn batch_get(&self, table: &str, keys: &[ResultId]) -> Result<Vec<ResultRecord>> {
        let dir = self.table_dir(table)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if validate_segment("result", key.as_str()).is_err() {
                tracing::warn!(result_id = %key, "skipping malformed result id");
                continue;
            }
            match read_json::<ResultRecord>(&dir.join(format!("{key}.json"))).await {
                Ok(record) => records.push(record),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn put(&self, table: &str, record: ResultRecord) -> Result<()> {
        validate_segment("result", record.result_id.as_str())?;
        let path = self
            .table_dir(table)?
            .join(format!("{}.json", record.result_id));
        write_json(&path, &record).await
    }
}

#[async_trait]
impl ComputePlatform for LocalPlatform {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        let path = self.function_path(&spec.name)?;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err("stat function", &path, e))?
        {
            return Err(Error::transport(
                "create_function",
                format!("function '{}' already exists", spec.name),
            ));
        }
        write_json(&path, spec).await?;
        Ok(format!("{FUNCTION_ID_PREFIX}{}", spec.name))
    }

    async fn bind_queue(
        &self,
        function_name: &str,
        queue_arn: &str,
        batch_size: usize,
    ) -> Result<String> {
        let function = self.function_path(function_name)?;
        if !tokio::fs::try_exists(&function)
            .await
            .map_err(|e| io_err("stat function", &function, e))?
        {
            return Err(Error::not_found("function", function_name));
        }
        let binding_id = uuid::Uuid::new_v4().to_string();
        write_json(
            &self.binding_path(&binding_id)?,
            &BindingRecord {
                function_name: function_name.to_string(),
                queue_arn: queue_arn.to_string(),
                batch_size,
            },
        )
        .await?;
        Ok(binding_id)
    }

    async fn delete_function(&self, function_id: &str) -> Result<DeleteOutcome> {
        let name = function_id
            .strip_prefix(FUNCTION_ID_PREFIX)
            .unwrap_or(function_id);
        delete_file(&self.function_path(name)?).await
    }

    async fn delete_binding(&self, binding_id: &str) -> Result<DeleteOutcome> {
        delete_file(&self.binding_path(binding_id)?).await
    }
}

fn validate_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(Error::configuration(format!(
            "invalid {what} name '{segment}'"
        )));
    }
    Ok(())
}

fn io_err(action: &str, path: &Path, source: std::io::Error) -> Error {
    if source.kind() == ErrorKind::NotFound {
        Error::not_found("file", path.display().to_string())
    } else {
        Error::storage_with_source(format!("failed to {action} at {}", path.display()), source)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| io_err("read", path, e))?;
    serde_json::from_slice(&raw).map_err(|e| Error::Serialization {
        message: format!("failed to parse {}: {e}", path.display()),
    })
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization {
        message: format!("failed to serialize {}: {e}", path.display()),
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err("create directory", parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| io_err("write", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err("replace", path, e))
}

async fn remove_file(path: &Path) -> Result<()> {
    delete_file(path).await.map(|_| ())
}

async fn delete_file(path: &Path) -> Result<DeleteOutcome> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(io_err("delete", path, e)),
    }
}

async fn sorted_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err("list", dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err("list", dir, e))? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinrun_core::config::FunctionRuntime;
    use twinrun_core::id::{ItemId, MessageId, Variant};

    fn outbound(body: &str, group: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            id: MessageId::generate(),
            body: body.to_string(),
            group_id: group.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn queue_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());

        let q = platform
            .create_queue("exp42_benchmark", &QueueOptions::default())
            .await
            .unwrap();
        assert_eq!(q.url, "local://queues/exp42_benchmark");
        assert_eq!(platform.queue_arn(&q.url).await.unwrap(), q.arn);
        assert_eq!(platform.find_queues("exp42_").await.unwrap(), vec![q.url.clone()]);

        platform
            .send_batch(&q.url, vec![outbound("a", None), outbound("b", None)])
            .await
            .unwrap();
        assert_eq!(platform.peek(&q.url).await.unwrap(), ["a", "b"]);

        platform.purge_queue(&q.url).await.unwrap();
        assert!(platform.peek(&q.url).await.unwrap().is_empty());

        assert_eq!(platform.delete_queue(&q.url).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(
            platform.delete_queue(&q.url).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert!(platform.find_queues("exp42_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_leases_until_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let q = platform
            .create_queue("exp42_completion", &QueueOptions::default())
            .await
            .unwrap();
        platform.push(&q.url, "r1").await.unwrap();
        platform.push(&q.url, "r2").await.unwrap();

        let got = platform.receive(&q.url, 10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(got.len(), 2);
        assert!(platform
            .receive(&q.url, 10, Duration::from_secs(30))
            .await
            .unwrap()
            .is_empty());

        let entries = got
            .iter()
            .map(|m| DeleteEntry {
                message_id: m.message_id.clone(),
                receipt_handle: m.receipt_handle.clone(),
            })
            .collect();
        platform.delete_batch(&q.url, entries).await.unwrap();
        assert!(sorted_json_files(&dir.path().join("queues/exp42_completion/inflight"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let q = platform
            .create_queue("exp42_completion", &QueueOptions::default())
            .await
            .unwrap();
        platform.push(&q.url, "r1").await.unwrap();

        let first = platform.receive(&q.url, 10, Duration::ZERO).await.unwrap();
        let second = platform.receive(&q.url, 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].message_id, second[0].message_id);

        // The stale receipt no longer matches a lease.
        let stale = DeleteEntry {
            message_id: first[0].message_id.clone(),
            receipt_handle: first[0].receipt_handle.clone(),
        };
        platform.delete_batch(&q.url, vec![stale]).await.unwrap();
    }

    #[tokio::test]
    async fn ordered_queue_requires_group() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let q = platform
            .create_queue("exp42_test", &QueueOptions::ordered())
            .await
            .unwrap();
        assert!(q.url.ends_with("exp42_test.fifo"));
        assert!(platform.send_batch(&q.url, vec![outbound("a", None)]).await.is_err());
        platform
            .send_batch(&q.url, vec![outbound("a", Some("task"))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn results_roundtrip_and_skip_missing() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let record = ResultRecord::new(
            ResultId::new("r1"),
            ItemId::new("d1"),
            Variant::Test,
            serde_json::json!({"a": {"b": 2}}),
        );
        platform.put("backtesting-result", record.clone()).await.unwrap();

        let got = platform
            .batch_get("backtesting-result", &[ResultId::new("r1"), ResultId::new("r9")])
            .await
            .unwrap();
        assert_eq!(got, vec![record]);
    }

    #[tokio::test]
    async fn functions_and_bindings_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let spec = FunctionSpec {
            name: "exp42_test".into(),
            artifact: dir.path().join("pkg.zip"),
            runtime: FunctionRuntime::default(),
            role: "role".into(),
            shared_mount: None,
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec!["sg-1".into()],
        };
        let (function_id, binding_id) = {
            let platform = LocalPlatform::new(dir.path());
            let id = platform.create_function(&spec).await.unwrap();
            let binding = platform.bind_queue("exp42_test", "local:queue:q", 10).await.unwrap();
            (id, binding)
        };
        assert_eq!(function_id, "local:function:exp42_test");

        let platform = LocalPlatform::new(dir.path());
        assert_eq!(
            platform.delete_binding(&binding_id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            platform.delete_function(&function_id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            platform.delete_function(&function_id).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        assert!(platform.queue_arn("local://queues/../etc").await.is_err());
        assert!(platform.queue_arn("memory://queues/q").await.is_err());
    }
}
