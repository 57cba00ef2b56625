//! Failure injection wrappers around platform services.
//!
//! Each wrapper forwards to an inner service and fails selected calls with a
//! transport error. Failures are armed per operation and either persist or
//! fire a fixed number of times.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use twinrun_flow::backend::{
    ComputePlatform, DeleteEntry, DeleteOutcome, FunctionSpec, OutboundMessage, QueueHandle,
    QueueOptions, QueueService, ReceivedMessage,
};
use twinrun_flow::error::{Error, Result};

/// Queue operation, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    /// `send_batch`.
    Send,
    /// `receive`.
    Receive,
    /// `delete_batch`.
    Delete,
    /// `delete_queue`.
    DeleteQueue,
}

#[derive(Debug, Clone, Copy)]
enum Arm {
    /// Pass `skip` calls through, then fail `times` calls (forever if `None`).
    After { skip: usize, times: Option<usize> },
}

struct Faults<K> {
    armed: Mutex<HashMap<K, Arm>>,
}

impl<K> Default for Faults<K> {
    fn default() -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: std::hash::Hash + Eq + Copy> Faults<K> {
    fn arm(&self, key: K, arm: Arm) {
        self.armed.lock().expect("lock").insert(key, arm);
    }

    fn clear(&self) {
        self.armed.lock().expect("lock").clear();
    }

    fn should_fail(&self, key: K) -> bool {
        let mut armed = self.armed.lock().expect("lock");
        let Some(Arm::After { skip, times }) = armed.get(&key).copied() else {
            return false;
        };
        if skip > 0 {
            armed.insert(key, Arm::After { skip: skip - 1, times });
            return false;
        }
        match times {
            None => true,
            Some(0) => {
                armed.remove(&key);
                false
            }
            Some(n) => {
                armed.insert(key, Arm::After { skip: 0, times: Some(n - 1) });
                true
            }
        }
    }
}

fn injected(operation: &'static str) -> Error {
    Error::transport(operation, "injected failure")
}

/// Queue service wrapper with failure injection.
pub struct FaultyQueueService {
    inner: Arc<dyn QueueService>,
    faults: Faults<QueueOp>,
}

impl FaultyQueueService {
    /// Wraps a queue service.
    pub fn new(inner: Arc<dyn QueueService>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    /// Fails every call of `op`.
    pub fn fail_always(&self, op: QueueOp) {
        self.faults.arm(op, Arm::After { skip: 0, times: None });
    }

    /// Lets `skip` calls of `op` through, then fails every later call.
    pub fn fail_after(&self, op: QueueOp, skip: usize) {
        self.faults.arm(op, Arm::After { skip, times: None });
    }

    /// Fails the next `times` calls of `op`.
    pub fn fail_times(&self, op: QueueOp, times: usize) {
        self.faults.arm(op, Arm::After { skip: 0, times: Some(times) });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.faults.clear();
    }
}

#[async_trait]
impl QueueService for FaultyQueueService {
    async fn find_queues(&self, name_prefix: &str) -> Result<Vec<String>> {
        self.inner.find_queues(name_prefix).await
    }

    async fn create_queue(&self, name: &str, options: &QueueOptions) -> Result<QueueHandle> {
        self.inner.create_queue(name, options).await
    }

    async fn queue_arn(&self, url: &str) -> Result<String> {
        self.inner.queue_arn(url).await
    }

    async fn purge_queue(&self, url: &str) -> Result<()> {
        self.inner.purge_queue(url).await
    }

    async fn delete_queue(&self, url: &str) -> Result<DeleteOutcome> {
        if self.faults.should_fail(QueueOp::DeleteQueue) {
            return Err(injected("delete_queue"));
        }
        self.inner.delete_queue(url).await
    }

    async fn send_batch(&self, url: &str, messages: Vec<OutboundMessage>) -> Result<()> {
        if self.faults.should_fail(QueueOp::Send) {
            return Err(injected("send_batch"));
        }
        self.inner.send_batch(url, messages).await
    }

    async fn receive(
        &self,
        url: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        if self.faults.should_fail(QueueOp::Receive) {
            return Err(injected("receive"));
        }
        self.inner.receive(url, max_messages, visibility_timeout).await
    }

    async fn delete_batch(&self, url: &str, entries: Vec<DeleteEntry>) -> Result<()> {
        if self.faults.should_fail(QueueOp::Delete) {
            return Err(injected("delete_batch"));
        }
        self.inner.delete_batch(url, entries).await
    }
}

/// Compute operation, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeOp {
    /// `create_function`.
    CreateFunction,
    /// `bind_queue`.
    BindQueue,
    /// `delete_function`.
    DeleteFunction,
    /// `delete_binding`.
    DeleteBinding,
}

/// Compute platform wrapper with failure injection.
pub struct FaultyCompute {
    inner: Arc<dyn ComputePlatform>,
    faults: Faults<ComputeOp>,
}

impl FaultyCompute {
    /// Wraps a compute platform.
    pub fn new(inner: Arc<dyn ComputePlatform>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    /// Fails every call of `op`.
    pub fn fail_always(&self, op: ComputeOp) {
        self.faults.arm(op, Arm::After { skip: 0, times: None });
    }

    /// Lets `skip` calls of `op` through, then fails every later call.
    pub fn fail_after(&self, op: ComputeOp, skip: usize) {
        self.faults.arm(op, Arm::After { skip, times: None });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.faults.clear();
    }
}

#[async_trait]
impl ComputePlatform for FaultyCompute {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        if self.faults.should_fail(ComputeOp::CreateFunction) {
            return Err(injected("create_function"));
        }
        self.inner.create_function(spec).await
    }

    async fn bind_queue(
        &self,
        function_name: &str,
        queue_arn: &str,
        batch_size: usize,
    ) -> Result<String> {
        if self.faults.should_fail(ComputeOp::BindQueue) {
            return Err(injected("bind_queue"));
        }
        self.inner.bind_queue(function_name, queue_arn, batch_size).await
    }

    async fn delete_function(&self, function_id: &str) -> Result<DeleteOutcome> {
        if self.faults.should_fail(ComputeOp::DeleteFunction) {
            return Err(injected("delete_function"));
        }
        self.inner.delete_function(function_id).await
    }

    async fn delete_binding(&self, binding_id: &str) -> Result<DeleteOutcome> {
        if self.faults.should_fail(ComputeOp::DeleteBinding) {
            return Err(injected("delete_binding"));
        }
        self.inner.delete_binding(binding_id).await
    }
}
