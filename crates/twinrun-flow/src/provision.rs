//! Pipeline provisioning.
//!
//! A run provisions one shared completion queue and, for each variant, a
//! worker pipeline: source checkout, support files, generated handler,
//! packaged artifact, dependencies on the shared mount, an input queue, a
//! compute function, and the binding between the two.
//!
//! ## Design Principles
//!
//! - **Record before proceeding**: Every created resource is appended to the
//!   [`Ledger`] before the next step starts
//! - **Persist on the way out**: [`Provisioner::deploy`] writes the ledger
//!   whether provisioning succeeds or fails; nothing is rolled back
//! - **Idempotent queues**: A queue with the run's name is purged and reused

use std::path::PathBuf;

use serde::Serialize;

use twinrun_core::config::RunConfig;
use twinrun_core::id::Variant;
use twinrun_core::observability::variant_span;
use twinrun_core::workspace::RunWorkspace;

use crate::artifact::{ArtifactBuilder, HandlerContext};
use crate::backend::{FunctionSpec, Platform, QueueHandle, QueueOptions, SharedMountSpec, MAX_BATCH_SIZE};
use crate::error::{Error, ProvisionStep, Result};
use crate::ledger::{Ledger, ResourceKind};
use crate::progress::ProgressSink;
use tracing::Instrument;

/// A provisioned worker pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineVariant {
    /// Which variant this pipeline runs.
    pub variant: Variant,
    /// Source repository and branch, as `<git>#<branch>`.
    pub source_ref: String,
    /// Support file URLs downloaded into the package.
    pub support_files: Vec<String>,
    /// Generated handler inside the package.
    pub generated_handler_path: PathBuf,
    /// Packaged worker artifact.
    pub packaged_artifact_path: PathBuf,
    /// Compute function identifier.
    pub compute_endpoint_id: String,
    /// Input queue bound to the function.
    pub input_queue: QueueHandle,
}

/// Everything a run provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedRun {
    /// Shared completion queue.
    pub completion_queue: QueueHandle,
    /// Reference pipeline.
    pub benchmark: PipelineVariant,
    /// Candidate pipeline.
    pub test: PipelineVariant,
}

impl ProvisionedRun {
    /// Input queues of both pipelines, benchmark first.
    #[must_use]
    pub fn input_queues(&self) -> [&QueueHandle; 2] {
        [&self.benchmark.input_queue, &self.test.input_queue]
    }
}

/// Provisions both worker pipelines of a run.
pub struct Provisioner<'a> {
    config: &'a RunConfig,
    platform: &'a Platform,
    builder: &'a dyn ArtifactBuilder,
    progress: &'a dyn ProgressSink,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        platform: &'a Platform,
        builder: &'a dyn ArtifactBuilder,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            platform,
            builder,
            progress,
        }
    }

    /// Provisions the run and persists the ledger, success or failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] naming the failed step,
    /// [`Error::Configuration`] if a queue name is ambiguous, or a storage
    /// error if the ledger cannot be written.
    #[tracing::instrument(skip_all, fields(task_id = %self.config.task_id()))]
    pub async fn deploy(&self, ledger: &mut Ledger) -> Result<ProvisionedRun> {
        let outcome = self.provision(ledger).await;
        let persisted = ledger.persist();
        match (outcome, persisted) {
            (Ok(run), Ok(())) => {
                tracing::info!(resources = ledger.len(), "provisioning complete");
                Ok(run)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), persisted) => {
                if let Err(persist_err) = persisted {
                    tracing::error!(error = %persist_err, "failed to persist ledger after provisioning failure");
                }
                tracing::warn!(error = %e, resources = ledger.len(), "provisioning failed");
                Err(e)
            }
        }
    }

    /// Provisions the run, recording every created resource in `ledger`.
    ///
    /// Does not persist the ledger; see [`Provisioner::deploy`].
    ///
    /// # Errors
    ///
    /// See [`Provisioner::deploy`].
    pub async fn provision(&self, ledger: &mut Ledger) -> Result<ProvisionedRun> {
        let workspace = RunWorkspace::new(self.config.task_workspace());
        workspace
            .ensure()
            .map_err(|e| Error::from(e).into_provisioning(ProvisionStep::PrepareWorkspace, ResourceKind::LocalArtifact))?;

        self.progress.phase("Creating completion queue...");
        let completion_queue = self
            .ensure_queue(
                &self.config.task_id().completion_queue_name(),
                &QueueOptions::default(),
                ledger,
            )
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::CompletionQueue, ResourceKind::Queue))?;

        self.progress.phase("Deploying benchmark processes...");
        let benchmark = self
            .provision_variant(Variant::Benchmark, &workspace, Some(&completion_queue), ledger)
            .instrument(self.variant_span(Variant::Benchmark))
            .await?;
        self.progress.phase("Deploying test processes...");
        let test = self
            .provision_variant(Variant::Test, &workspace, Some(&completion_queue), ledger)
            .instrument(self.variant_span(Variant::Test))
            .await?;

        Ok(ProvisionedRun {
            completion_queue,
            benchmark,
            test,
        })
    }

    fn variant_span(&self, variant: Variant) -> tracing::Span {
        variant_span("deploy", self.config.task_id().as_str(), variant.as_str())
    }

    /// Provisions one variant's pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] at [`ProvisionStep::GenerateHandler`]
    /// if `completion_queue` is `None`, and the failing step otherwise.
    pub async fn provision_variant(
        &self,
        variant: Variant,
        workspace: &RunWorkspace,
        completion_queue: Option<&QueueHandle>,
        ledger: &mut Ledger,
    ) -> Result<PipelineVariant> {
        let source = self.config.task().source(variant);
        let variant_dir = workspace.variant_dir(variant);
        let package_dir = workspace.package_dir(variant);
        let package_id = package_dir.display().to_string();

        tokio::fs::create_dir_all(&variant_dir).await.map_err(|e| {
            Error::storage_with_source(format!("failed to create {}", variant_dir.display()), e)
                .into_provisioning(ProvisionStep::PrepareWorkspace, ResourceKind::LocalArtifact)
        })?;

        self.progress.phase("Pulling source code...");
        self.builder
            .fetch_source(source, &package_dir)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::FetchSource, ResourceKind::LocalArtifact))?;
        ledger.record(ResourceKind::LocalArtifact, package_id.clone());

        self.progress.phase("Fetching support files...");
        self.builder
            .fetch_files(&source.files, &package_dir)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::FetchFiles, ResourceKind::LocalArtifact))?;
        ledger.record(ResourceKind::LocalArtifact, package_id.clone());

        self.progress.phase("Generating worker handler...");
        let context = self.handler_context(variant, completion_queue)?;
        let generated_handler_path = self
            .builder
            .generate_handler(&context, &package_dir)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::GenerateHandler, ResourceKind::LocalArtifact))?;
        ledger.record(ResourceKind::LocalArtifact, package_id);

        self.progress.phase("Creating deployment package...");
        let packaged_artifact_path = workspace.artifact_path(variant);
        self.builder
            .package(&package_dir, &packaged_artifact_path)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::Package, ResourceKind::LocalArtifact))?;
        ledger.record(ResourceKind::LocalArtifact, variant_dir.display().to_string());

        self.progress.phase("Deploying dependencies to shared mount...");
        let host_lib = self.config.host_lib_location(variant);
        self.builder
            .install_dependencies(&source.python, &package_dir, &host_lib)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::InstallDependencies, ResourceKind::SharedMount))?;
        ledger.record(ResourceKind::SharedMount, host_lib.display().to_string());

        let resource_name = self.config.task_id().variant_resource_name(variant);
        let options = if self.config.deploy().ordered_input_queues {
            QueueOptions::ordered()
        } else {
            QueueOptions::default()
        };
        let input_queue = self
            .ensure_queue(&resource_name, &options, ledger)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::InputQueue, ResourceKind::Queue))?;

        self.progress.phase(&format!("Deploying compute function \"{resource_name}\"..."));
        let spec = self.function_spec(&resource_name, packaged_artifact_path.clone());
        let compute_endpoint_id = self
            .platform
            .compute
            .create_function(&spec)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::ComputeFunction, ResourceKind::ComputeFunction))?;
        ledger.record(ResourceKind::ComputeFunction, compute_endpoint_id.clone());

        let binding_id = self
            .platform
            .compute
            .bind_queue(&resource_name, &input_queue.arn, MAX_BATCH_SIZE)
            .await
            .map_err(|e| e.into_provisioning(ProvisionStep::QueueBinding, ResourceKind::QueueBinding))?;
        ledger.record(ResourceKind::QueueBinding, binding_id);

        tracing::info!(variant = %variant, function = %compute_endpoint_id, queue = %input_queue.url, "variant provisioned");
        Ok(PipelineVariant {
            variant,
            source_ref: format!("{}#{}", source.git, source.branch),
            support_files: source.files.clone(),
            generated_handler_path,
            packaged_artifact_path,
            compute_endpoint_id,
            input_queue,
        })
    }

    /// Builds the handler context of a variant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] if the completion queue does not exist yet.
    pub fn handler_context(
        &self,
        variant: Variant,
        completion_queue: Option<&QueueHandle>,
    ) -> Result<HandlerContext> {
        let completion_queue = completion_queue.ok_or_else(|| Error::Provisioning {
            step: ProvisionStep::GenerateHandler,
            kind: ResourceKind::LocalArtifact,
            message: "completion queue has to be created first".into(),
            source: None,
        })?;
        Ok(HandlerContext {
            lib_location: self.config.worker_lib_location(variant).display().to_string(),
            completion_queue: completion_queue.url.clone(),
            exec_type: variant.as_str().to_string(),
            task_id: self.config.task_id().to_string(),
        })
    }

    fn function_spec(&self, name: &str, artifact: PathBuf) -> FunctionSpec {
        let deploy = self.config.deploy();
        FunctionSpec {
            name: name.to_string(),
            artifact,
            runtime: deploy.function_runtime.clone(),
            role: deploy.aws_role_lambda_arn.clone(),
            shared_mount: (!deploy.efs_ap_arn.is_empty()).then(|| SharedMountSpec {
                access_point: deploy.efs_ap_arn.clone(),
                mount_path: deploy.lambda_efs_mount_path.clone(),
            }),
            subnet_ids: deploy.lambda_vpc_subnet_ids.clone(),
            security_group_ids: if deploy.lambda_security_group_id.is_empty() {
                Vec::new()
            } else {
                vec![deploy.lambda_security_group_id.clone()]
            },
        }
    }

    /// Creates a queue, or purges and reuses the single existing match.
    /// The queue is recorded unless the ledger already lists it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if more than one queue matches `name`.
    pub async fn ensure_queue(
        &self,
        name: &str,
        options: &QueueOptions,
        ledger: &mut Ledger,
    ) -> Result<QueueHandle> {
        self.progress.phase(&format!("Creating queue \"{name}\"..."));
        let queues = &self.platform.queues;
        let existing = queues.find_queues(name).await?;
        let handle = match existing.as_slice() {
            [] => queues.create_queue(name, options).await?,
            [url] => {
                tracing::info!(queue = %url, "queue exists, purging");
                queues.purge_queue(url).await?;
                QueueHandle {
                    url: url.clone(),
                    arn: queues.queue_arn(url).await?,
                }
            }
            many => {
                return Err(Error::configuration(format!(
                    "multiple existing queues match '{name}': {}",
                    many.join(",")
                )))
            }
        };
        if !ledger.contains(ResourceKind::Queue, &handle.url) {
            ledger.record(ResourceKind::Queue, handle.url.clone());
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryQueueService;
    use crate::backend::QueueService;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use twinrun_core::config::{DeployConfig, TaskConfig, VariantSource};

    struct StubBuilder;

    #[async_trait]
    impl ArtifactBuilder for StubBuilder {
        async fn fetch_source(&self, _: &VariantSource, dest: &Path) -> Result<()> {
            std::fs::create_dir_all(dest).map_err(|e| Error::storage_with_source("mkdir", e))
        }
        async fn fetch_files(&self, _: &[String], _: &Path) -> Result<()> {
            Ok(())
        }
        async fn generate_handler(&self, _: &HandlerContext, dest: &Path) -> Result<PathBuf> {
            Ok(dest.join("handler"))
        }
        async fn package(&self, _: &Path, _: &Path) -> Result<()> {
            Err(Error::artifact("package", "zip exited with 12"))
        }
        async fn install_dependencies(&self, _: &str, _: &Path, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn config(workspace: &Path) -> RunConfig {
        let deploy: DeployConfig = serde_json::from_value(serde_json::json!({
            "workspace_path": workspace,
            "ec2_efs_mount_path": workspace.join("efs"),
            "lambda_efs_mount_path": "/mnt/lambda",
            "backend": {"kind": "memory"}
        }))
        .unwrap();
        let task: TaskConfig = serde_json::from_value(serde_json::json!({
            "task_id": "exp42",
            "benchmark": {"git": "https://git.example.com/m.git", "branch": "main"},
            "test": {"git": "https://git.example.com/m.git", "branch": "cand"}
        }))
        .unwrap();
        RunConfig::new(deploy, task).unwrap()
    }

    #[tokio::test]
    async fn handler_requires_completion_queue() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let platform = Platform::from_config(&config.deploy().backend);
        let provisioner = Provisioner::new(&config, &platform, &StubBuilder, &NoProgress);

        let err = provisioner.handler_context(Variant::Test, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning {
                step: ProvisionStep::GenerateHandler,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ensure_queue_reuses_single_match_and_rejects_many() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let queues = Arc::new(InMemoryQueueService::new());
        let platform = Platform::from_config(&config.deploy().backend);
        let platform = Platform::new(queues.clone(), platform.results, platform.compute);
        let provisioner = Provisioner::new(&config, &platform, &StubBuilder, &NoProgress);
        let mut ledger = Ledger::new(dir.path().join("ledger.json"));

        let first = provisioner
            .ensure_queue("exp42_completion", &QueueOptions::default(), &mut ledger)
            .await
            .unwrap();
        queues.push(&first.url, "stale").unwrap();
        let again = provisioner
            .ensure_queue("exp42_completion", &QueueOptions::default(), &mut ledger)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(queues.visible_len(&first.url).unwrap(), 0);
        assert_eq!(ledger.len(), 1);

        queues
            .create_queue("exp42_completion_old", &QueueOptions::default())
            .await
            .unwrap();
        let err = provisioner
            .ensure_queue("exp42_completion", &QueueOptions::default(), &mut ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn failed_deploy_persists_partial_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let platform = Platform::from_config(&config.deploy().backend);
        let provisioner = Provisioner::new(&config, &platform, &StubBuilder, &NoProgress);
        let workspace = RunWorkspace::new(config.task_workspace());
        let mut ledger = Ledger::new(workspace.ledger_path());

        let err = provisioner.deploy(&mut ledger).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning {
                step: ProvisionStep::Package,
                kind: ResourceKind::LocalArtifact,
                ..
            }
        ));

        let persisted = Ledger::load(workspace.ledger_path()).unwrap();
        let kinds: Vec<_> = persisted.entries().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Queue,
                ResourceKind::LocalArtifact,
                ResourceKind::LocalArtifact,
                ResourceKind::LocalArtifact,
            ]
        );
        assert_eq!(persisted.completion_queue(config.task_id()).unwrap(), "memory://queues/exp42_completion");
    }
}
