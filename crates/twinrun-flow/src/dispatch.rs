//! Work dispatch.
//!
//! Fans the run's work items out to every input queue in batches of
//! [`MAX_BATCH_SIZE`]. Batches are sent batch-major: the first batch goes to
//! every queue before the second batch goes to any, so both variants receive
//! work at the same pace.
//!
//! Message bodies are the raw item IDs. Each message carries a fresh random
//! batch-entry ID unrelated to the item. Ordered queues additionally carry the
//! single group key [`MESSAGE_GROUP`].
//!
//! Delivery is at-least-once at best: a failed batch is reported with the
//! items it contained and is not retried.

use serde::Serialize;

use twinrun_core::id::{ItemId, MessageId};

use crate::backend::{is_ordered_queue, queue_name_from_url, OutboundMessage, QueueService, MAX_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::metrics::RunMetrics;
use crate::progress::ProgressSink;

/// Group key shared by every message sent to an ordered queue.
pub const MESSAGE_GROUP: &str = "task";

/// A dispatch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    /// Queue URL.
    pub url: String,
    /// Whether the queue is ordered.
    pub ordered: bool,
}

impl QueueDescriptor {
    /// Describes a queue from its URL; `.fifo` names are ordered.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let ordered = is_ordered_queue(&url);
        Self { url, ordered }
    }
}

/// Totals of a completed dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Distinct work items dispatched.
    pub items: usize,
    /// Target queues.
    pub queues: usize,
    /// Batches sent to each queue.
    pub batches_per_queue: usize,
    /// Messages sent across all queues.
    pub messages_sent: usize,
}

/// Builds the outbound batch for one chunk of items.
#[must_use]
pub fn build_batch(chunk: &[ItemId], target: &QueueDescriptor) -> Vec<OutboundMessage> {
    chunk
        .iter()
        .map(|item| OutboundMessage {
            id: MessageId::generate(),
            body: item.as_str().to_string(),
            group_id: target.ordered.then(|| MESSAGE_GROUP.to_string()),
        })
        .collect()
}

/// Sends work items to input queues.
pub struct Dispatcher<'a> {
    queues: &'a dyn QueueService,
    progress: &'a dyn ProgressSink,
    metrics: RunMetrics,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(queues: &'a dyn QueueService, progress: &'a dyn ProgressSink) -> Self {
        Self {
            queues,
            progress,
            metrics: RunMetrics::new(),
        }
    }

    /// Sends every item to every target queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dispatch`] with the failed batch's items and queue.
    /// Batches sent before the failure are not recalled.
    #[tracing::instrument(skip_all, fields(items = items.len(), queues = targets.len()))]
    pub async fn dispatch(
        &self,
        items: &[ItemId],
        targets: &[QueueDescriptor],
    ) -> Result<DispatchSummary> {
        let total = items.len();
        let mut summary = DispatchSummary {
            items: total,
            queues: targets.len(),
            ..DispatchSummary::default()
        };

        for (index, chunk) in items.chunks(MAX_BATCH_SIZE).enumerate() {
            for target in targets {
                let batch = build_batch(chunk, target);
                if let Err(e) = self.queues.send_batch(&target.url, batch).await {
                    tracing::warn!(queue = %target.url, batch = index, error = %e, "batch send failed");
                    return Err(Error::Dispatch {
                        queue: target.url.clone(),
                        items: chunk.to_vec(),
                        source: Box::new(e),
                    });
                }
                self.metrics
                    .record_dispatched(queue_name_from_url(&target.url), chunk.len());
                summary.messages_sent += chunk.len();
            }
            summary.batches_per_queue = index + 1;
            let sent = (index + 1) * MAX_BATCH_SIZE;
            self.progress.advance(sent.min(total), total, "events pushed");
        }

        tracing::info!(
            messages = summary.messages_sent,
            batches = summary.batches_per_queue,
            "dispatch complete"
        );
        Ok(summary)
    }
}
