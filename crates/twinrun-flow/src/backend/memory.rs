//! In-memory platform implementation for testing.
//!
//! This module provides in-process implementations of the backend traits:
//!
//! - [`InMemoryQueueService`]: Queues with visibility timeouts and redelivery
//! - [`InMemoryResultStore`]: Result tables keyed by result ID
//! - [`InMemoryComputePlatform`]: Function and binding registry
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no distribution
//! - **Single-process only**: State is not visible across process boundaries
//! - **No invocation**: Bound functions are recorded, never executed; tests
//!   drive workers explicitly
//!
//! Visibility deadlines use `tokio::time::Instant`, so tests running with a
//! paused clock observe redelivery deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use ulid::Ulid;

use twinrun_core::id::ResultId;

use super::{
    ComputePlatform, DeleteEntry, DeleteOutcome, FunctionSpec, OutboundMessage, QueueHandle,
    QueueOptions, QueueService, ReceivedMessage, ResultStore, MAX_BATCH_SIZE,
    ORDERED_QUEUE_SUFFIX,
};
use crate::error::{Error, Result};
use crate::record::ResultRecord;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("in-memory platform lock poisoned")
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    group_id: Option<String>,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug)]
struct MemoryQueue {
    arn: String,
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    sent_batches: Vec<Vec<OutboundMessage>>,
}

impl MemoryQueue {
    /// Returns expired in-flight messages to the front of the queue.
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                self.visible.push_front(flight.message);
            }
        }
    }
}

/// In-memory queue service.
#[derive(Debug, Default)]
pub struct InMemoryQueueService {
    queues: RwLock<BTreeMap<String, MemoryQueue>>,
}

impl InMemoryQueueService {
    /// Creates an empty queue service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// URL of a queue with the given name.
    #[must_use]
    pub fn url_for(name: &str) -> String {
        format!("memory://queues/{name}")
    }

    /// Enqueues a single message body, as a worker would.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist.
    pub fn push(&self, url: &str, body: impl Into<String>) -> Result<()> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        queue.visible.push_back(StoredMessage {
            message_id: Ulid::new().to_string(),
            body: body.into(),
            group_id: None,
        });
        drop(queues);
        Ok(())
    }

    /// Removes and returns every visible message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist.
    pub fn take_all(&self, url: &str) -> Result<Vec<String>> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        let bodies = queue.visible.drain(..).map(|m| m.body).collect();
        drop(queues);
        Ok(bodies)
    }

    /// Number of visible messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist.
    pub fn visible_len(&self, url: &str) -> Result<usize> {
        let queues = self.queues.read().map_err(poison_err)?;
        queues
            .get(url)
            .map(|q| q.visible.len())
            .ok_or_else(|| Error::not_found("queue", url))
    }

    /// Number of received but unacknowledged messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist.
    pub fn in_flight_len(&self, url: &str) -> Result<usize> {
        let queues = self.queues.read().map_err(poison_err)?;
        queues
            .get(url)
            .map(|q| q.in_flight.len())
            .ok_or_else(|| Error::not_found("queue", url))
    }

    /// Every batch passed to `send_batch` for the queue, in call order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist.
    pub fn sent_batches(&self, url: &str) -> Result<Vec<Vec<OutboundMessage>>> {
        let queues = self.queues.read().map_err(poison_err)?;
        queues
            .get(url)
            .map(|q| q.sent_batches.clone())
            .ok_or_else(|| Error::not_found("queue", url))
    }

    /// URLs of every existing queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn queue_urls(&self) -> Result<Vec<String>> {
        let queues = self.queues.read().map_err(poison_err)?;
        Ok(queues.keys().cloned().collect())
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn find_queues(&self, name_prefix: &str) -> Result<Vec<String>> {
        let prefix = Self::url_for(name_prefix);
        let queues = self.queues.read().map_err(poison_err)?;
        Ok(queues
            .keys()
            .filter(|url| url.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn create_queue(&self, name: &str, options: &QueueOptions) -> Result<QueueHandle> {
        let name = if options.ordered {
            format!("{name}{ORDERED_QUEUE_SUFFIX}")
        } else {
            name.to_string()
        };
        let url = Self::url_for(&name);
        let arn = format!("arn:memory:queue:{name}");
        let mut queues = self.queues.write().map_err(poison_err)?;
        queues.entry(url.clone()).or_insert_with(|| MemoryQueue {
            arn: arn.clone(),
            visible: VecDeque::new(),
            in_flight: HashMap::new(),
            sent_batches: Vec::new(),
        });
        drop(queues);
        Ok(QueueHandle { url, arn })
    }

    async fn queue_arn(&self, url: &str) -> Result<String> {
        let queues = self.queues.read().map_err(poison_err)?;
        queues
            .get(url)
            .map(|q| q.arn.clone())
            .ok_or_else(|| Error::not_found("queue", url))
    }

    async fn purge_queue(&self, url: &str) -> Result<()> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        queue.visible.clear();
        queue.in_flight.clear();
        drop(queues);
        Ok(())
    }

    async fn delete_queue(&self, url: &str) -> Result<DeleteOutcome> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        Ok(match queues.remove(url) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }

    async fn send_batch(&self, url: &str, messages: Vec<OutboundMessage>) -> Result<()> {
        if messages.len() > MAX_BATCH_SIZE {
            return Err(Error::transport(
                "send_batch",
                format!("batch of {} exceeds limit {MAX_BATCH_SIZE}", messages.len()),
            ));
        }
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        let ordered = url.ends_with(ORDERED_QUEUE_SUFFIX);
        if messages.iter().any(|m| m.group_id.is_some() != ordered) {
            return Err(Error::transport(
                "send_batch",
                "group id must be set exactly for ordered queues",
            ));
        }
        for message in &messages {
            queue.visible.push_back(StoredMessage {
                message_id: Ulid::new().to_string(),
                body: message.body.clone(),
                group_id: message.group_id.clone(),
            });
        }
        queue.sent_batches.push(messages);
        drop(queues);
        Ok(())
    }

    async fn receive(
        &self,
        url: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        queue.release_expired(now);

        let take = max_messages.min(MAX_BATCH_SIZE).min(queue.visible.len());
        let taken: Vec<StoredMessage> = queue.visible.drain(..take).collect();
        let mut received = Vec::with_capacity(take);
        for message in taken {
            let receipt = Ulid::new().to_string();
            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt.clone(),
                body: message.body.clone(),
            });
            queue.in_flight.insert(
                receipt,
                InFlight {
                    message,
                    visible_at: now + visibility_timeout,
                },
            );
        }
        drop(queues);
        Ok(received)
    }

    async fn delete_batch(&self, url: &str, entries: Vec<DeleteEntry>) -> Result<()> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        let queue = queues
            .get_mut(url)
            .ok_or_else(|| Error::not_found("queue", url))?;
        for entry in entries {
            queue.in_flight.remove(&entry.receipt_handle);
        }
        drop(queues);
        Ok(())
    }
}

/// In-memory result store.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    tables: RwLock<HashMap<String, HashMap<ResultId, ResultRecord>>>,
}

impl InMemoryResultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(table).map_or(0, HashMap::len))
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn batch_get(&self, table: &str, keys: &[ResultId]) -> Result<Vec<ResultRecord>> {
        let tables = self.tables.read().map_err(poison_err)?;
        let Some(records) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).cloned())
            .collect())
    }

    async fn put(&self, table: &str, record: ResultRecord) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(record.result_id.clone(), record);
        drop(tables);
        Ok(())
    }
}

/// A recorded queue binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Bound function name.
    pub function_name: String,
    /// Bound queue.
    pub queue_arn: String,
    /// Messages per invocation.
    pub batch_size: usize,
}

#[derive(Debug, Default)]
struct ComputeState {
    functions: BTreeMap<String, FunctionSpec>,
    bindings: BTreeMap<String, Binding>,
}

/// In-memory compute platform.
#[derive(Debug, Default)]
pub struct InMemoryComputePlatform {
    state: RwLock<ComputeState>,
}

impl InMemoryComputePlatform {
    /// Creates an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier assigned to a function name.
    #[must_use]
    pub fn function_id(name: &str) -> String {
        format!("arn:memory:function:{name}")
    }

    /// Names of existing functions.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn function_names(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.functions.keys().cloned().collect())
    }

    /// Spec of an existing function.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn function(&self, name: &str) -> Result<Option<FunctionSpec>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.functions.get(name).cloned())
    }

    /// Existing bindings keyed by binding ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn bindings(&self) -> Result<BTreeMap<String, Binding>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.bindings.clone())
    }
}

#[async_trait]
impl ComputePlatform for InMemoryComputePlatform {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        let mut state = self.state.write().map_err(poison_err)?;
        if state.functions.contains_key(&spec.name) {
            return Err(Error::transport(
                "create_function",
                format!("function '{}' already exists", spec.name),
            ));
        }
        state.functions.insert(spec.name.clone(), spec.clone());
        drop(state);
        Ok(Self::function_id(&spec.name))
    }

    async fn bind_queue(
        &self,
        function_name: &str,
        queue_arn: &str,
        batch_size: usize,
    ) -> Result<String> {
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.functions.contains_key(function_name) {
            return Err(Error::not_found("function", function_name));
        }
        let binding_id = uuid::Uuid::new_v4().to_string();
        state.bindings.insert(
            binding_id.clone(),
            Binding {
                function_name: function_name.to_string(),
                queue_arn: queue_arn.to_string(),
                batch_size,
            },
        );
        drop(state);
        Ok(binding_id)
    }

    async fn delete_function(&self, function_id: &str) -> Result<DeleteOutcome> {
        let name = function_id.rsplit(':').next().unwrap_or(function_id);
        let mut state = self.state.write().map_err(poison_err)?;
        Ok(match state.functions.remove(name) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }

    async fn delete_binding(&self, binding_id: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.write().map_err(poison_err)?;
        Ok(match state.bindings.remove(binding_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }
}
