use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row written once per successfully dispatched message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessageRecord {
    pub message_id: String,
    pub topic: String,
    pub offset: i64,
    pub partition_number: i32,
    pub operation: String,
    pub entity_type: String,
    pub processed_timestamp: DateTime<Utc>,
}

impl ProcessedMessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        topic: impl Into<String>,
        partition_number: i32,
        offset: i64,
        operation: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            topic: topic.into(),
            offset,
            partition_number,
            operation: operation.into(),
            entity_type: entity_type.into(),
            processed_timestamp: Utc::now(),
        }
    }
}
