//! Local run workspace layout.
//!
//! Every run owns a directory `<workspace_path>/<task_id>/` holding:
//!
//! - `deployed_list.json`: the deployment ledger
//! - `historical_data_ids.txt`: newline-separated work item IDs
//! - `benchmark/`, `test/`: per-variant build directories
//!
//! The files are plain text so an operator can inspect or repair them by hand.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::id::{ItemId, Variant};

/// File name of the deployment ledger.
pub const LEDGER_FILE_NAME: &str = "deployed_list.json";

/// File name of the work item list.
pub const ITEM_IDS_FILE_NAME: &str = "historical_data_ids.txt";

/// File name of the packaged worker artifact inside a variant directory.
pub const DEPLOY_PACKAGE_FILE_NAME: &str = "deployment-package.zip";

/// Paths inside a run workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWorkspace {
    root: PathBuf,
}

impl RunWorkspace {
    /// Creates a handle for the workspace rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the workspace directory if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| Error::io(&self.root, "failed to create run workspace", e))
    }

    /// Path of the deployment ledger.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE_NAME)
    }

    /// Path of the work item list.
    #[must_use]
    pub fn item_ids_path(&self) -> PathBuf {
        self.root.join(ITEM_IDS_FILE_NAME)
    }

    /// Build directory of a variant.
    #[must_use]
    pub fn variant_dir(&self, variant: Variant) -> PathBuf {
        self.root.join(variant.as_str())
    }

    /// Directory whose contents are packaged into the worker artifact.
    #[must_use]
    pub fn package_dir(&self, variant: Variant) -> PathBuf {
        self.variant_dir(variant).join("package")
    }

    /// Packaged worker artifact of a variant.
    #[must_use]
    pub fn artifact_path(&self, variant: Variant) -> PathBuf {
        self.variant_dir(variant).join(DEPLOY_PACKAGE_FILE_NAME)
    }

    /// Reads the work item list, dropping blank lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_item_ids(&self) -> Result<Vec<ItemId>> {
        let path = self.item_ids_path();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(&path, "failed to read work item list", e))?;
        Ok(parse_item_ids(&content))
    }

    /// Writes the work item list, one ID per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_item_ids(&self, ids: &[ItemId]) -> Result<()> {
        let path = self.item_ids_path();
        let content = ids.iter().map(ItemId::as_str).collect::<Vec<_>>().join("\n");
        std::fs::write(&path, content)
            .map_err(|e| Error::io(&path, "failed to write work item list", e))
    }
}

/// Parses newline-separated item IDs, skipping blank lines.
#[must_use]
pub fn parse_item_ids(content: &str) -> Vec<ItemId> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ItemId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_filters_blank_lines() {
        let ids = parse_item_ids("a\n\nb\r\nc\n");
        assert_eq!(ids, vec![ItemId::new("a"), ItemId::new("b"), ItemId::new("c")]);
        assert!(parse_item_ids("").is_empty());
    }

    #[test]
    fn item_ids_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::new(dir.path().join("exp42"));
        workspace.ensure().unwrap();

        let ids: Vec<ItemId> = ["id-1", "id-2", "id-3"].into_iter().map(ItemId::new).collect();
        workspace.write_item_ids(&ids).unwrap();

        let raw = std::fs::read_to_string(workspace.item_ids_path()).unwrap();
        assert_eq!(raw, "id-1\nid-2\nid-3");
        assert_eq!(workspace.read_item_ids().unwrap(), ids);
    }

    #[test]
    fn layout_paths() {
        let workspace = RunWorkspace::new("/work/exp42");
        assert_eq!(workspace.ledger_path(), PathBuf::from("/work/exp42/deployed_list.json"));
        assert_eq!(
            workspace.package_dir(Variant::Test),
            PathBuf::from("/work/exp42/test/package")
        );
        assert_eq!(
            workspace.artifact_path(Variant::Benchmark),
            PathBuf::from("/work/exp42/benchmark/deployment-package.zip")
        );
    }

    #[test]
    fn missing_item_list_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::new(dir.path());
        assert!(workspace.read_item_ids().unwrap_err().is_not_found());
    }
}
