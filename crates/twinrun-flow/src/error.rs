//! Error types for the comparison pipeline.

use twinrun_core::id::ItemId;

use crate::ledger::ResourceKind;

/// The result type used throughout twinrun-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Provisioning step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Preparing the local run workspace.
    PrepareWorkspace,
    /// Creating the shared completion queue.
    CompletionQueue,
    /// Fetching worker source code.
    FetchSource,
    /// Downloading support files.
    FetchFiles,
    /// Generating the worker handler.
    GenerateHandler,
    /// Packaging the worker artifact.
    Package,
    /// Installing dependencies onto the shared mount.
    InstallDependencies,
    /// Creating a variant's input queue.
    InputQueue,
    /// Creating the compute function.
    ComputeFunction,
    /// Binding the input queue to the compute function.
    QueueBinding,
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PrepareWorkspace => "prepare_workspace",
            Self::CompletionQueue => "completion_queue",
            Self::FetchSource => "fetch_source",
            Self::FetchFiles => "fetch_files",
            Self::GenerateHandler => "generate_handler",
            Self::Package => "package",
            Self::InstallDependencies => "install_dependencies",
            Self::InputQueue => "input_queue",
            Self::ComputeFunction => "compute_function",
            Self::QueueBinding => "queue_binding",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while running a comparison.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Creating an external resource failed. The ledger still covers every
    /// resource created before the failure.
    #[error("provisioning failed at {step} ({kind}): {message}")]
    Provisioning {
        /// The step that failed.
        step: ProvisionStep,
        /// Kind of resource being created.
        kind: ResourceKind,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Deleting an external resource failed. Entries not yet deleted remain
    /// in the ledger for a retry.
    #[error("teardown failed deleting {kind} '{identifier}': {message}")]
    Teardown {
        /// Kind of resource being deleted.
        kind: ResourceKind,
        /// Identifier of the resource.
        identifier: String,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A pre-existing resource is ambiguous or the configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A queue or result store call failed.
    #[error("transport error during {operation}: {message}")]
    Transport {
        /// The remote operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A dispatch batch could not be sent.
    #[error("failed to send batch of {} items to {queue}: {source}", items.len())]
    Dispatch {
        /// Queue the batch was sent to.
        queue: String,
        /// Items in the failed batch.
        items: Vec<ItemId>,
        /// The underlying transport failure.
        #[source]
        source: Box<Error>,
    },

    /// Building a worker artifact failed (fetch, render, package, install).
    #[error("artifact build failed during {operation}: {message}")]
    Artifact {
        /// The build operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The referenced resource does not exist.
    #[error("not found: {resource_type} '{id}'")]
    NotFound {
        /// The type of resource.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A local storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from twinrun-core.
    #[error("core error: {0}")]
    Core(#[from] twinrun_core::error::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new transport error.
    #[must_use]
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new transport error with a source.
    #[must_use]
    pub fn transport_with_source(
        operation: &'static str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new artifact build error.
    #[must_use]
    pub fn artifact(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Artifact {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new artifact build error with a source.
    #[must_use]
    pub fn artifact_with_source(
        operation: &'static str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Artifact {
            operation,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps this error as a provisioning failure.
    ///
    /// Configuration errors pass through unchanged: an ambiguous pre-existing
    /// resource is not a creation failure.
    #[must_use]
    pub fn into_provisioning(self, step: ProvisionStep, kind: ResourceKind) -> Self {
        match self {
            already @ (Self::Provisioning { .. } | Self::Configuration { .. }) => already,
            other => Self::Provisioning {
                step,
                kind,
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Returns true if the error reports a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Core(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn provisioning_error_display() {
        let err = Error::transport("create_queue", "connection reset")
            .into_provisioning(ProvisionStep::InputQueue, ResourceKind::Queue);
        let msg = err.to_string();
        assert!(msg.contains("input_queue"));
        assert!(msg.contains("sqs_queue"));
        assert!(msg.contains("connection reset"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn into_provisioning_keeps_original_step() {
        let err = Error::transport("zip", "exit 1")
            .into_provisioning(ProvisionStep::Package, ResourceKind::LocalArtifact)
            .into_provisioning(ProvisionStep::QueueBinding, ResourceKind::QueueBinding);
        assert!(matches!(
            err,
            Error::Provisioning {
                step: ProvisionStep::Package,
                ..
            }
        ));
    }

    #[test]
    fn configuration_error_is_not_wrapped() {
        let err = Error::configuration("2 queues match exp42_test")
            .into_provisioning(ProvisionStep::InputQueue, ResourceKind::Queue);
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn dispatch_error_lists_batch_size() {
        let err = Error::Dispatch {
            queue: "exp42_test".into(),
            items: vec![ItemId::new("a"), ItemId::new("b")],
            source: Box::new(Error::transport("send_batch", "throttled")),
        };
        assert!(err.to_string().contains("batch of 2 items"));
    }

    #[test]
    fn not_found_detection() {
        assert!(Error::not_found("queue", "q").is_not_found());
        assert!(!Error::configuration("two queues").is_not_found());
        let core = twinrun_core::error::Error::resource_not_found("function", "f");
        assert!(Error::from(core).is_not_found());
    }
}
