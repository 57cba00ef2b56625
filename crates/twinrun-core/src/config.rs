//! Run configuration.
//!
//! A run is described by two JSON documents:
//!
//! - `deploy_config.json`: environment settings shared by every run (workspace
//!   root, shared mount paths, platform role and network settings, backend)
//! - `task_config.json`: the run itself (task ID and both variants' sources)
//!
//! Both are merged into an immutable [`RunConfig`] that is passed explicitly to
//! every component. Nothing in twinrun reads ambient process state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{TaskId, Variant};

/// Default name of the result store table written by workers.
pub const DEFAULT_RESULT_TABLE: &str = "backtesting-result";

/// Default drain idle threshold in seconds.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 60;

/// Order in which teardown processes ledger entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOrder {
    /// Oldest entry first (the order resources were created).
    #[default]
    Creation,
    /// Newest entry first.
    Reverse,
}

/// Backend hosting queues, result records, and compute functions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Filesystem emulator rooted at a directory.
    Local {
        /// Root directory of the emulated platform.
        root: PathBuf,
    },
    /// In-process backend (single invocation only).
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from(".twinrun-platform"),
        }
    }
}

/// Compute function runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionRuntime {
    /// Runtime identifier passed to the compute platform.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Handler entry point inside the artifact.
    #[serde(default = "default_handler")]
    pub handler: String,
    /// Invocation timeout in seconds.
    #[serde(default = "default_function_timeout_secs")]
    pub timeout_secs: u32,
    /// Memory size in MiB.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
}

fn default_runtime() -> String {
    "python3.8".to_string()
}

fn default_handler() -> String {
    "lambda_function.lambda_handler".to_string()
}

const fn default_function_timeout_secs() -> u32 {
    30
}

const fn default_memory_mb() -> u32 {
    2048
}

impl Default for FunctionRuntime {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            handler: default_handler(),
            timeout_secs: default_function_timeout_secs(),
            memory_mb: default_memory_mb(),
        }
    }
}

/// Environment settings from `deploy_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Root directory under which each run gets `<workspace_path>/<task_id>`.
    pub workspace_path: PathBuf,
    /// Shared mount path as seen by the provisioning host.
    pub ec2_efs_mount_path: PathBuf,
    /// Shared mount path as seen by the compute functions.
    pub lambda_efs_mount_path: PathBuf,
    /// Role assumed by compute functions.
    #[serde(default)]
    pub aws_role_lambda_arn: String,
    /// Access point of the shared mount.
    #[serde(default)]
    pub efs_ap_arn: String,
    /// Subnets the compute functions run in.
    #[serde(default)]
    pub lambda_vpc_subnet_ids: Vec<String>,
    /// Security group of the compute functions.
    #[serde(default)]
    pub lambda_security_group_id: String,
    /// Result store table written by workers.
    #[serde(default = "default_result_table")]
    pub result_table: String,
    /// Seconds without new completion signals before the drain gives up.
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    /// Sleep between empty polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ledger processing order during teardown.
    #[serde(default)]
    pub teardown_order: TeardownOrder,
    /// Create the variants' input queues as ordered queues.
    #[serde(default)]
    pub ordered_input_queues: bool,
    /// Platform backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Optional handler template rendered into each worker package.
    #[serde(default)]
    pub handler_template: Option<PathBuf>,
    /// Compute function runtime settings.
    #[serde(default)]
    pub function_runtime: FunctionRuntime,
}

fn default_result_table() -> String {
    DEFAULT_RESULT_TABLE.to_string()
}

const fn default_idle_threshold_secs() -> u64 {
    DEFAULT_IDLE_THRESHOLD_SECS
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

/// Source of one variant's worker code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantSource {
    /// Git repository URL.
    pub git: String,
    /// Branch to check out.
    pub branch: String,
    /// Extra files downloaded into the package.
    #[serde(default)]
    pub files: Vec<String>,
    /// Interpreter used to install dependencies.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_python() -> String {
    "python3".to_string()
}

/// The run description from `task_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Run identifier.
    pub task_id: TaskId,
    /// Reference variant.
    pub benchmark: VariantSource,
    /// Candidate variant.
    pub test: VariantSource,
}

impl TaskConfig {
    /// Returns the source of the given variant.
    #[must_use]
    pub const fn source(&self, variant: Variant) -> &VariantSource {
        match variant {
            Variant::Benchmark => &self.benchmark,
            Variant::Test => &self.test,
        }
    }
}

/// Immutable configuration of one comparison run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    deploy: DeployConfig,
    task: TaskConfig,
}

impl RunConfig {
    /// Builds a validated run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a required value is missing or invalid.
    pub fn new(deploy: DeployConfig, task: TaskConfig) -> Result<Self> {
        let config = Self { deploy, task };
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the two configuration files.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed, or if
    /// validation fails.
    pub fn load(deploy_path: &Path, task_path: &Path) -> Result<Self> {
        let deploy: DeployConfig = read_json(deploy_path)?;
        let task: TaskConfig = read_json(task_path)?;
        Self::new(deploy, task)
    }

    fn validate(&self) -> Result<()> {
        if self.deploy.workspace_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("workspace_path cannot be empty".into()));
        }
        if self.deploy.result_table.trim().is_empty() {
            return Err(Error::InvalidConfig("result_table cannot be empty".into()));
        }
        if self.deploy.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        for variant in Variant::ALL {
            let source = self.task.source(variant);
            if source.git.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{variant}.git cannot be empty")));
            }
            if source.branch.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "{variant}.branch cannot be empty"
                )));
            }
            if let Some(bad) = source.files.iter().find(|u| !u.contains('/')) {
                return Err(Error::InvalidConfig(format!(
                    "{variant}.files entry '{bad}' is not a URL"
                )));
            }
        }
        Ok(())
    }

    /// Environment settings.
    #[must_use]
    pub const fn deploy(&self) -> &DeployConfig {
        &self.deploy
    }

    /// Run description.
    #[must_use]
    pub const fn task(&self) -> &TaskConfig {
        &self.task
    }

    /// Run identifier.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task.task_id
    }

    /// Local workspace directory for this run.
    #[must_use]
    pub fn task_workspace(&self) -> PathBuf {
        self.deploy.workspace_path.join(self.task.task_id.as_str())
    }

    /// Dependency install location on the provisioning host.
    #[must_use]
    pub fn host_lib_location(&self, variant: Variant) -> PathBuf {
        self.deploy
            .ec2_efs_mount_path
            .join(self.task.task_id.as_str())
            .join(variant.as_str())
    }

    /// Dependency location as seen by the compute function.
    #[must_use]
    pub fn worker_lib_location(&self, variant: Variant) -> PathBuf {
        self.deploy
            .lambda_efs_mount_path
            .join(self.task.task_id.as_str())
            .join(variant.as_str())
    }

    /// Drain idle threshold.
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.deploy.idle_threshold_secs)
    }

    /// Sleep between empty polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.deploy.poll_interval_ms)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(path, "failed to read configuration", e))?;
    serde_json::from_str(&content).map_err(|e| Error::Serialization {
        message: format!("failed to parse {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deploy_json() -> serde_json::Value {
        serde_json::json!({
            "workspace_path": "/tmp/twinrun",
            "ec2_efs_mount_path": "/mnt/efs",
            "lambda_efs_mount_path": "/mnt/lambda",
            "aws_role_lambda_arn": "arn:role/worker",
            "efs_ap_arn": "arn:efs/ap",
            "lambda_vpc_subnet_ids": ["subnet-1"],
            "lambda_security_group_id": "sg-1"
        })
    }

    fn task_json() -> serde_json::Value {
        serde_json::json!({
            "task_id": "exp42",
            "benchmark": {"git": "https://git.example.com/model.git", "branch": "main", "files": [], "python": "python3.8"},
            "test": {"git": "https://git.example.com/model.git", "branch": "candidate", "files": ["https://files.example.com/weights.bin"]}
        })
    }

    fn build() -> Result<RunConfig> {
        let deploy: DeployConfig = serde_json::from_value(deploy_json()).unwrap();
        let task: TaskConfig = serde_json::from_value(task_json()).unwrap();
        RunConfig::new(deploy, task)
    }

    #[test]
    fn defaults_are_applied() {
        let config = build().unwrap();
        assert_eq!(config.deploy().result_table, DEFAULT_RESULT_TABLE);
        assert_eq!(config.idle_threshold(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.deploy().teardown_order, TeardownOrder::Creation);
        assert!(!config.deploy().ordered_input_queues);
        assert_eq!(config.task().test.python, "python3");
        assert_eq!(config.deploy().function_runtime.memory_mb, 2048);
    }

    #[test]
    fn derived_paths() {
        let config = build().unwrap();
        assert_eq!(config.task_workspace(), PathBuf::from("/tmp/twinrun/exp42"));
        assert_eq!(
            config.host_lib_location(Variant::Test),
            PathBuf::from("/mnt/efs/exp42/test")
        );
        assert_eq!(
            config.worker_lib_location(Variant::Benchmark),
            PathBuf::from("/mnt/lambda/exp42/benchmark")
        );
    }

    #[test]
    fn rejects_empty_branch() {
        let deploy: DeployConfig = serde_json::from_value(deploy_json()).unwrap();
        let mut task: TaskConfig = serde_json::from_value(task_json()).unwrap();
        task.test.branch = String::new();
        let err = RunConfig::new(deploy, task).unwrap_err();
        assert!(err.to_string().contains("test.branch"));
    }

    #[test]
    fn backend_config_is_tagged() {
        let backend: BackendConfig =
            serde_json::from_str(r#"{"kind":"local","root":"/srv/platform"}"#).unwrap();
        assert_eq!(
            backend,
            BackendConfig::Local {
                root: PathBuf::from("/srv/platform")
            }
        );
        let memory: BackendConfig = serde_json::from_str(r#"{"kind":"memory"}"#).unwrap();
        assert_eq!(memory, BackendConfig::Memory);
    }

    #[test]
    fn load_reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_path = dir.path().join("deploy_config.json");
        let task_path = dir.path().join("task_config.json");
        std::fs::write(&deploy_path, deploy_json().to_string()).unwrap();
        std::fs::write(&task_path, task_json().to_string()).unwrap();

        let config = RunConfig::load(&deploy_path, &task_path).unwrap();
        assert_eq!(config.task_id().as_str(), "exp42");
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::load(&dir.path().join("nope.json"), &dir.path().join("task.json"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
