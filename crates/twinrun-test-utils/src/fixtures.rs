//! Pre-built run configurations for common test scenarios.
//!
//! Every [`TestRun`] owns a temporary directory holding its workspace, the
//! host side of the shared mount, and (for the local backend) the emulated
//! platform root. The directory is removed when the fixture is dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use twinrun_core::config::{DeployConfig, RunConfig, TaskConfig};
use twinrun_core::id::ItemId;
use twinrun_core::workspace::RunWorkspace;
use twinrun_flow::backend::Platform;

/// Idle threshold used by fixtures, in seconds.
pub const TEST_IDLE_THRESHOLD_SECS: u64 = 3;

/// Poll interval used by fixtures, in milliseconds.
pub const TEST_POLL_INTERVAL_MS: u64 = 250;

/// A run configuration rooted in a temporary directory.
pub struct TestRun {
    dir: TempDir,
    /// Validated configuration.
    pub config: RunConfig,
}

impl TestRun {
    /// Creates a run on the in-memory backend.
    pub fn memory(task_id: &str) -> Self {
        Self::build(task_id, |_| json!({"kind": "memory"}), |_| {})
    }

    /// Creates a run on the filesystem backend.
    pub fn local(task_id: &str) -> Self {
        Self::build(
            task_id,
            |root| json!({"kind": "local", "root": root.join("platform")}),
            |_| {},
        )
    }

    /// Creates a run on the in-memory backend and lets the caller adjust the
    /// deploy document before validation.
    pub fn memory_with(task_id: &str, adjust: impl FnOnce(&mut Value)) -> Self {
        Self::build(task_id, |_| json!({"kind": "memory"}), adjust)
    }

    fn build(
        task_id: &str,
        backend: impl FnOnce(&Path) -> Value,
        adjust: impl FnOnce(&mut Value),
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut deploy = deploy_config_json(dir.path(), backend(dir.path()));
        adjust(&mut deploy);
        let deploy: DeployConfig = serde_json::from_value(deploy).expect("deploy config");
        let task: TaskConfig = serde_json::from_value(task_config_json(task_id)).expect("task config");
        let config = RunConfig::new(deploy, task).expect("valid config");
        Self { dir, config }
    }

    /// Root of the temporary directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Run workspace.
    pub fn workspace(&self) -> RunWorkspace {
        RunWorkspace::new(self.config.task_workspace())
    }

    /// Platform selected by the configuration.
    pub fn platform(&self) -> Platform {
        Platform::from_config(&self.config.deploy().backend)
    }

    /// Writes `n` generated item IDs to the workspace and returns them.
    pub fn write_items(&self, n: usize) -> Vec<ItemId> {
        let items = item_ids(n);
        let workspace = self.workspace();
        workspace.ensure().expect("workspace");
        workspace.write_item_ids(&items).expect("item ids");
        items
    }

    /// Writes both configuration documents and returns their paths.
    pub fn write_config_files(&self) -> (PathBuf, PathBuf) {
        let deploy = self.root().join("deploy_config.json");
        let task = self.root().join("task_config.json");
        std::fs::write(
            &deploy,
            serde_json::to_string_pretty(self.config.deploy()).expect("serialize"),
        )
        .expect("write deploy config");
        std::fs::write(
            &task,
            serde_json::to_string_pretty(self.config.task()).expect("serialize"),
        )
        .expect("write task config");
        (deploy, task)
    }

    /// Longest a drain can stay idle before terminating, plus one poll.
    pub fn idle_budget(&self) -> Duration {
        self.config.idle_threshold() + self.config.poll_interval()
    }
}

/// `deploy_config.json` contents rooted at `root`.
pub fn deploy_config_json(root: &Path, backend: Value) -> Value {
    json!({
        "workspace_path": root.join("workspace"),
        "ec2_efs_mount_path": root.join("efs"),
        "lambda_efs_mount_path": "/mnt/lambda",
        "aws_role_lambda_arn": "arn:role/worker",
        "efs_ap_arn": "arn:efs/access-point",
        "lambda_vpc_subnet_ids": ["subnet-a", "subnet-b"],
        "lambda_security_group_id": "sg-worker",
        "idle_threshold_secs": TEST_IDLE_THRESHOLD_SECS,
        "poll_interval_ms": TEST_POLL_INTERVAL_MS,
        "backend": backend
    })
}

/// `task_config.json` contents for `task_id`.
pub fn task_config_json(task_id: &str) -> Value {
    json!({
        "task_id": task_id,
        "benchmark": {
            "git": "https://git.example.com/strategy.git",
            "branch": "main",
            "files": ["https://files.example.com/model/weights.bin"]
        },
        "test": {
            "git": "https://git.example.com/strategy.git",
            "branch": "candidate",
            "files": []
        }
    })
}

/// Generates `n` distinct item IDs.
pub fn item_ids(n: usize) -> Vec<ItemId> {
    (0..n).map(|i| ItemId::new(format!("item-{i:04}"))).collect()
}
