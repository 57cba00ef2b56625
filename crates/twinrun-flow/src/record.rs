//! Worker output records and completion signals.
//!
//! ## Worker Contract
//!
//! For every work item it processes, a worker:
//!
//! 1. writes one [`ResultRecord`] to the result table, keyed by a fresh result ID
//! 2. then posts the result ID as the body of a message on the completion queue
//!
//! The write must be durable before the signal is posted. The drain relies on
//! this ordering and cannot enforce it; see [`crate::drain`] for the single
//! re-fetch it performs when a referenced record is momentarily absent.

use serde::{Deserialize, Serialize};

use twinrun_core::id::{ItemId, ResultId, Variant};

/// Output of one variant for one work item.
///
/// Field names on the wire follow the result table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Key of the record.
    pub result_id: ResultId,
    /// Work item the record belongs to.
    #[serde(rename = "data_id")]
    pub item_id: ItemId,
    /// Variant that produced it.
    #[serde(rename = "exec_type")]
    pub variant: Variant,
    /// Nested output mapping.
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
}

impl ResultRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(
        result_id: ResultId,
        item_id: ItemId,
        variant: Variant,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            result_id,
            item_id,
            variant,
            payload,
        }
    }
}

/// A received completion message referencing one result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSignal {
    /// Transport message ID.
    pub message_id: String,
    /// Handle used to acknowledge the message.
    pub receipt_handle: String,
    /// Result record the message refers to.
    pub result_id: ResultId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_table_field_names() {
        let record = ResultRecord::new(
            ResultId::new("r-1"),
            ItemId::new("d-1"),
            Variant::Test,
            serde_json::json!({"score": 0.5}),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "result_id": "r-1",
                "data_id": "d-1",
                "exec_type": "test",
                "data": {"score": 0.5}
            })
        );
    }

    #[test]
    fn record_rejects_unknown_variant() {
        let raw = r#"{"result_id":"r","data_id":"d","exec_type":"control","data":{}}"#;
        assert!(serde_json::from_str::<ResultRecord>(raw).is_err());
    }
}
