//! Simulated workers.
//!
//! A [`SimulatedWorker`] stands in for one variant's compute function. It
//! consumes its input queue and, for each work item, writes a result record
//! and then posts the record's ID to the completion queue, the same ordering
//! real workers must follow.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use ulid::Ulid;

use twinrun_core::config::RunConfig;
use twinrun_core::id::{ItemId, MessageId, ResultId, TaskId, Variant};
use twinrun_flow::backend::{
    queue_name_from_url, DeleteEntry, OutboundMessage, Platform, QueueService, ResultStore,
    ORDERED_QUEUE_SUFFIX,
};
use twinrun_flow::error::{Error, Result};
use twinrun_flow::record::ResultRecord;

/// Computes a variant's output for one item.
pub type PayloadFn = Arc<dyn Fn(&ItemId, Variant) -> Value + Send + Sync>;

/// Output shared by both variants unless overridden.
pub fn default_payload(item: &ItemId, _variant: Variant) -> Value {
    json!({
        "item": item.as_str(),
        "pnl": 100.0,
        "trades": {"count": 12, "side": "long"}
    })
}

/// A stand-in worker for one variant.
#[derive(Clone)]
pub struct SimulatedWorker {
    queues: Arc<dyn QueueService>,
    results: Arc<dyn ResultStore>,
    variant: Variant,
    input_queue_name: String,
    completion_queue_name: String,
    table: String,
    payload: PayloadFn,
    duplicate_signals: bool,
}

impl SimulatedWorker {
    /// Creates the worker of `variant` for the run described by `config`.
    pub fn new(config: &RunConfig, platform: &Platform, variant: Variant) -> Self {
        let task: &TaskId = config.task_id();
        Self {
            queues: platform.queues.clone(),
            results: platform.results.clone(),
            variant,
            input_queue_name: task.variant_resource_name(variant),
            completion_queue_name: task.completion_queue_name(),
            table: config.deploy().result_table.clone(),
            payload: Arc::new(default_payload),
            duplicate_signals: false,
        }
    }

    /// Replaces the output function.
    #[must_use]
    pub fn with_payload(
        mut self,
        payload: impl Fn(&ItemId, Variant) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.payload = Arc::new(payload);
        self
    }

    /// Posts every completion signal twice.
    #[must_use]
    pub fn with_duplicate_signals(mut self) -> Self {
        self.duplicate_signals = true;
        self
    }

    async fn find(&self, name: &str) -> Result<String> {
        let ordered = format!("{name}{ORDERED_QUEUE_SUFFIX}");
        self.queues
            .find_queues(name)
            .await?
            .into_iter()
            .find(|url| {
                let found = queue_name_from_url(url);
                found == name || found == ordered
            })
            .ok_or_else(|| Error::not_found("queue", name))
    }

    /// Processes one received batch and returns the number of items handled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the queues do not exist yet, or the
    /// first transport error.
    pub async fn process_once(&self) -> Result<usize> {
        let input = self.find(&self.input_queue_name).await?;
        let completion = self.find(&self.completion_queue_name).await?;
        let messages = self
            .queues
            .receive(&input, 10, Duration::from_secs(30))
            .await?;
        let handled = messages.len();

        let mut acks = Vec::with_capacity(handled);
        for message in messages {
            let item = ItemId::new(message.body.clone());
            let result_id = ResultId::new(Ulid::new().to_string());
            let payload = (self.payload)(&item, self.variant);
            self.results
                .put(
                    &self.table,
                    ResultRecord::new(result_id.clone(), item, self.variant, payload),
                )
                .await?;

            let copies = if self.duplicate_signals { 2 } else { 1 };
            for _ in 0..copies {
                let signal = OutboundMessage {
                    id: MessageId::generate(),
                    body: result_id.as_str().to_string(),
                    group_id: None,
                };
                self.queues.send_batch(&completion, vec![signal]).await?;
            }
            acks.push(DeleteEntry {
                message_id: message.message_id,
                receipt_handle: message.receipt_handle,
            });
        }
        if !acks.is_empty() {
            self.queues.delete_batch(&input, acks).await?;
        }
        Ok(handled)
    }

    /// Processes batches until the input queue is empty.
    ///
    /// # Errors
    ///
    /// See [`SimulatedWorker::process_once`].
    pub async fn process_all(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let handled = self.process_once().await?;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Polls the input queue every `interval` until the handle is aborted.
    ///
    /// Missing queues are tolerated so the worker can start before deploy.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.process_all().await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => tracing::warn!(variant = %self.variant, error = %e, "simulated worker failed"),
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}
