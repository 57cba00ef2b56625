//! Strongly-typed identifiers for twinrun entities.
//!
//! Work items and result records are identified by opaque strings chosen by the
//! external data store, so [`ItemId`] and [`ResultId`] are thin newtypes that
//! exist only to keep the two from being mixed up. Transport message IDs are
//! random UUIDs with no business meaning.
//!
//! # Example
//!
//! ```rust
//! use twinrun_core::id::{ItemId, MessageId, Variant};
//!
//! let item = ItemId::new("9c0f6a4e-data");
//! let message = MessageId::generate();
//! assert_ne!(item.as_str(), message.to_string());
//! assert_eq!(Variant::Test.as_str(), "test");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of a platform queue or function name.
pub const MAX_RESOURCE_NAME_LEN: usize = 80;

/// Longest suffix appended to a task ID when naming resources (`_completion.fifo`).
const LONGEST_RESOURCE_SUFFIX: usize = "_completion.fifo".len();

/// Identifier of one work item in the external input data store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item ID from its raw string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a result record in the result store.
///
/// Distinct from [`ItemId`]: one item produces two result records, one per variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    /// Creates a result ID from its raw string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level message ID used only for batch-entry deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random message ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a comparison run, used to name every provisioned resource.
///
/// Must be non-empty and contain only ASCII alphanumerics, `-` and `_`, short
/// enough that `<task_id>_completion.fifo` still fits the platform name limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Creates a validated task ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the ID is empty, too long, or contains
    /// characters that are not valid in queue and function names.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "task ID cannot be empty".into(),
            });
        }
        if id.len() + LONGEST_RESOURCE_SUFFIX > MAX_RESOURCE_NAME_LEN {
            return Err(Error::InvalidId {
                message: format!(
                    "task ID '{id}' is too long (max {} characters)",
                    MAX_RESOURCE_NAME_LEN - LONGEST_RESOURCE_SUFFIX
                ),
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidId {
                message: format!("task ID '{id}' contains invalid character '{bad}'"),
            });
        }
        Ok(Self(id))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the shared completion queue for this run.
    #[must_use]
    pub fn completion_queue_name(&self) -> String {
        format!("{}_completion", self.0)
    }

    /// Name shared by a variant's input queue and compute function.
    #[must_use]
    pub fn variant_resource_name(&self, variant: Variant) -> String {
        format!("{}_{}", self.0, variant.as_str())
    }
}

impl TryFrom<String> for TaskId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the two code paths under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// The reference implementation.
    Benchmark,
    /// The candidate implementation.
    Test,
}

impl Variant {
    /// Both variants, in provisioning order.
    pub const ALL: [Self; 2] = [Self::Benchmark, Self::Test];

    /// Returns the wire name of the variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Benchmark => "benchmark",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "benchmark" => Ok(Self::Benchmark),
            "test" => Ok(Self::Test),
            other => Err(Error::InvalidId {
                message: format!("unknown variant '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_rejects_empty_and_invalid() {
        assert!(TaskId::new("").is_err());
        assert!(TaskId::new("has space").is_err());
        assert!(TaskId::new("dot.ted").is_err());
        assert!(TaskId::new("x".repeat(70)).is_err());
        assert!(TaskId::new("nightly-2024_07").is_ok());
    }

    #[test]
    fn task_id_resource_names() {
        let task = TaskId::new("exp42").unwrap();
        assert_eq!(task.completion_queue_name(), "exp42_completion");
        assert_eq!(task.variant_resource_name(Variant::Benchmark), "exp42_benchmark");
        assert_eq!(task.variant_resource_name(Variant::Test), "exp42_test");
    }

    #[test]
    fn task_id_deserialization_validates() {
        let ok: serde_json::Result<TaskId> = serde_json::from_str("\"exp42\"");
        assert!(ok.is_ok());
        let bad: serde_json::Result<TaskId> = serde_json::from_str("\"bad/id\"");
        assert!(bad.is_err());
    }

    #[test]
    fn variant_roundtrips_through_str() {
        for variant in Variant::ALL {
            assert_eq!(variant.as_str().parse::<Variant>().unwrap(), variant);
        }
        assert!("control".parse::<Variant>().is_err());
    }

    #[test]
    fn variant_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Variant::Benchmark).unwrap(),
            "\"benchmark\""
        );
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
