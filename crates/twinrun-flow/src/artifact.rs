//! Worker artifact builder.
//!
//! Building a worker package is delegated to external tools: `git` fetches
//! the source, support files are downloaded over HTTP, `zip` packages the
//! directory, and the variant's interpreter installs dependencies onto the
//! shared mount. The provisioner only sees the [`ArtifactBuilder`] trait, so
//! tests substitute a builder that writes placeholder files.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use twinrun_core::config::VariantSource;

use crate::error::{Error, Result};

/// File written into the package when no handler template is configured.
pub const HANDLER_DESCRIPTOR_FILE_NAME: &str = "handler_context.json";

/// Extension stripped from a template file name to get the handler file name.
pub const TEMPLATE_EXTENSION: &str = "j2";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Values made available to the generated worker handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerContext {
    /// Dependency directory as seen by the worker.
    pub lib_location: String,
    /// URL of the completion queue the worker signals.
    pub completion_queue: String,
    /// Variant name (`benchmark` or `test`).
    pub exec_type: String,
    /// Run identifier.
    pub task_id: String,
}

impl HandlerContext {
    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("lib_location", self.lib_location.as_str()),
            ("completion_queue", self.completion_queue.as_str()),
            ("exec_type", self.exec_type.as_str()),
            ("task_id", self.task_id.as_str()),
        ]
    }
}

/// Substitutes `{{ name }}` placeholders with context values.
///
/// Both `{{name}}` and `{{ name }}` spellings are accepted. Unknown
/// placeholders are left untouched.
#[must_use]
pub fn render_template(template: &str, context: &HandlerContext) -> String {
    let mut rendered = template.to_string();
    for (key, value) in context.pairs() {
        rendered = rendered
            .replace(&format!("{{{{ {key} }}}}"), value)
            .replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

/// Builds the packaged worker artifact of one variant.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Clones the variant's source into `dest`, replacing existing contents.
    async fn fetch_source(&self, source: &VariantSource, dest: &Path) -> Result<()>;

    /// Downloads support files into `dest`, named after the last URL segment.
    async fn fetch_files(&self, urls: &[String], dest: &Path) -> Result<()>;

    /// Writes the worker handler into `dest` and returns its path.
    async fn generate_handler(&self, context: &HandlerContext, dest: &Path) -> Result<PathBuf>;

    /// Packages the contents of `package_dir` into `artifact`.
    async fn package(&self, package_dir: &Path, artifact: &Path) -> Result<()>;

    /// Installs the package's requirements into `lib_location`.
    async fn install_dependencies(
        &self,
        python: &str,
        package_dir: &Path,
        lib_location: &Path,
    ) -> Result<()>;
}

/// Artifact builder backed by `git`, `zip`, HTTP downloads, and `pip`.
#[derive(Debug, Clone)]
pub struct CommandArtifactBuilder {
    handler_template: Option<PathBuf>,
    client: reqwest::Client,
}

impl CommandArtifactBuilder {
    /// Creates a builder. Without a template, handlers are written as a JSON
    /// descriptor of the [`HandlerContext`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(handler_template: Option<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::artifact_with_source("fetch_files", "failed to build HTTP client", e))?;
        Ok(Self {
            handler_template,
            client,
        })
    }
}

#[async_trait]
impl ArtifactBuilder for CommandArtifactBuilder {
    #[tracing::instrument(skip(self, source), fields(branch = %source.branch))]
    async fn fetch_source(&self, source: &VariantSource, dest: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::artifact_with_source(
                    "fetch_source",
                    format!("failed to clear {}", dest.display()),
                    e,
                ))
            }
        }
        create_dir(dest, "fetch_source").await?;
        run_command(
            "fetch_source",
            Command::new("git")
                .arg("clone")
                .arg("--branch")
                .arg(&source.branch)
                .arg(&source.git)
                .arg(dest),
        )
        .await
    }

    #[tracing::instrument(skip(self, urls), fields(count = urls.len()))]
    async fn fetch_files(&self, urls: &[String], dest: &Path) -> Result<()> {
        create_dir(dest, "fetch_files").await?;
        for url in urls {
            let file_name = url
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| Error::artifact("fetch_files", format!("'{url}' has no file name")))?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| Error::artifact_with_source("fetch_files", format!("GET {url}"), e))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::artifact_with_source("fetch_files", format!("GET {url}"), e))?;
            let path = dest.join(file_name);
            tokio::fs::write(&path, &body).await.map_err(|e| {
                Error::artifact_with_source("fetch_files", format!("failed to write {}", path.display()), e)
            })?;
            tracing::debug!(url = %url, bytes = body.len(), "downloaded support file");
        }
        Ok(())
    }

    async fn generate_handler(&self, context: &HandlerContext, dest: &Path) -> Result<PathBuf> {
        create_dir(dest, "generate_handler").await?;
        let (path, content) = match &self.handler_template {
            Some(template_path) => {
                let template = tokio::fs::read_to_string(template_path).await.map_err(|e| {
                    Error::artifact_with_source(
                        "generate_handler",
                        format!("failed to read template {}", template_path.display()),
                        e,
                    )
                })?;
                (
                    dest.join(handler_file_name(template_path)?),
                    render_template(&template, context),
                )
            }
            None => {
                let json = serde_json::to_string_pretty(context).map_err(|e| Error::Serialization {
                    message: format!("failed to serialize handler context: {e}"),
                })?;
                (dest.join(HANDLER_DESCRIPTOR_FILE_NAME), json)
            }
        };
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::artifact_with_source("generate_handler", format!("failed to write {}", path.display()), e)
        })?;
        Ok(path)
    }

    #[tracing::instrument(skip(self))]
    async fn package(&self, package_dir: &Path, artifact: &Path) -> Result<()> {
        match tokio::fs::remove_file(artifact).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::artifact_with_source(
                    "package",
                    format!("failed to remove stale {}", artifact.display()),
                    e,
                ))
            }
        }
        let artifact = std::path::absolute(artifact).map_err(|e| {
            Error::artifact_with_source("package", format!("invalid path {}", artifact.display()), e)
        })?;
        run_command(
            "package",
            Command::new("zip")
                .arg("-q")
                .arg("-r")
                .arg(&artifact)
                .arg("./")
                .arg("-x")
                .arg("*.git*")
                .current_dir(package_dir),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn install_dependencies(
        &self,
        python: &str,
        package_dir: &Path,
        lib_location: &Path,
    ) -> Result<()> {
        create_dir(lib_location, "install_dependencies").await?;
        let requirements = package_dir.join("requirements.txt");
        if !requirements.exists() {
            tracing::info!(path = %requirements.display(), "no requirements file, skipping install");
            return Ok(());
        }
        run_command(
            "install_dependencies",
            Command::new(python)
                .args(["-m", "pip", "install", "-q", "-r", "requirements.txt", "-t"])
                .arg(lib_location)
                .current_dir(package_dir),
        )
        .await
    }
}

/// Handler file name for a template: the template name without `.j2`.
fn handler_file_name(template_path: &Path) -> Result<String> {
    let name = template_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::artifact(
                "generate_handler",
                format!("invalid template path {}", template_path.display()),
            )
        })?;
    Ok(name
        .strip_suffix(&format!(".{TEMPLATE_EXTENSION}"))
        .unwrap_or(name)
        .to_string())
}

async fn create_dir(path: &Path, operation: &'static str) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        Error::artifact_with_source(operation, format!("failed to create {}", path.display()), e)
    })
}

async fn run_command(operation: &'static str, command: &mut Command) -> Result<()> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    tracing::debug!(operation, program = %program, "running command");
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::artifact_with_source(operation, format!("failed to run {program}"), e))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::artifact(
        operation,
        format!("{program} exited with {}: {}", output.status, stderr.trim()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> HandlerContext {
        HandlerContext {
            lib_location: "/mnt/lambda/exp42/test".into(),
            completion_queue: "local://queues/exp42_completion".into(),
            exec_type: "test".into(),
            task_id: "exp42".into(),
        }
    }

    #[test]
    fn render_substitutes_both_spellings() {
        let rendered = render_template(
            "sys.path.insert(0, '{{ lib_location }}')\nQ = '{{completion_queue}}'\nX = '{{ other }}'",
            &context(),
        );
        assert_eq!(
            rendered,
            "sys.path.insert(0, '/mnt/lambda/exp42/test')\nQ = 'local://queues/exp42_completion'\nX = '{{ other }}'"
        );
    }

    #[test]
    fn handler_name_strips_template_extension() {
        assert_eq!(
            handler_file_name(Path::new("/t/lambda_function.py.j2")).unwrap(),
            "lambda_function.py"
        );
        assert_eq!(handler_file_name(Path::new("/t/handler.py")).unwrap(), "handler.py");
    }

    #[tokio::test]
    async fn descriptor_without_template() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandArtifactBuilder::new(None).unwrap();
        let path = builder.generate_handler(&context(), dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join(HANDLER_DESCRIPTOR_FILE_NAME));

        let written: HandlerContext =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, context());
    }

    #[tokio::test]
    async fn template_is_rendered_into_package() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("lambda_function.py.j2");
        std::fs::write(&template, "TASK = '{{ task_id }}'").unwrap();
        let package = dir.path().join("package");

        let builder = CommandArtifactBuilder::new(Some(template)).unwrap();
        let path = builder.generate_handler(&context(), &package).await.unwrap();
        assert_eq!(path, package.join("lambda_function.py"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "TASK = 'exp42'");
    }

    #[tokio::test]
    async fn install_skips_without_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandArtifactBuilder::new(None).unwrap();
        builder
            .install_dependencies("python3", dir.path(), &dir.path().join("lib"))
            .await
            .unwrap();
        assert!(dir.path().join("lib").is_dir());
    }

    #[tokio::test]
    async fn failing_command_reports_operation() {
        let err = run_command("package", &mut Command::new("false"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact { operation: "package", .. }));
    }
}
