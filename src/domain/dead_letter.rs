use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::envelope::EnvelopeMetadata;

/// Diagnostic value stored in a dead-letter record's context map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Flag(value)
    }
}

/// A message that exhausted its retries or failed with a non-retryable error.
///
/// Fields are only reachable through accessors: a record is assembled once by
/// [`DeadLetterRecordBuilder`] and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    envelope: Option<EnvelopeMetadata>,
    original_topic: String,
    original_key: Option<String>,
    original_offset: i64,
    original_partition: i32,
    original_timestamp: Option<i64>,
    /// Base64 of the raw payload.
    original_payload: Option<String>,
    original_headers: BTreeMap<String, String>,
    error_message: String,
    error_class: String,
    error_stack_trace: Option<String>,
    retry_attempts: u32,
    consumer_group_id: String,
    consumer_id: String,
    timestamp: DateTime<Utc>,
    additional_context: HashMap<String, ContextValue>,
}

impl DeadLetterRecord {
    pub fn builder(original_topic: impl Into<String>) -> DeadLetterRecordBuilder {
        DeadLetterRecordBuilder::new(original_topic)
    }

    pub fn envelope(&self) -> Option<&EnvelopeMetadata> {
        self.envelope.as_ref()
    }

    pub fn original_topic(&self) -> &str {
        &self.original_topic
    }

    pub fn original_key(&self) -> Option<&str> {
        self.original_key.as_deref()
    }

    pub fn original_offset(&self) -> i64 {
        self.original_offset
    }

    pub fn original_partition(&self) -> i32 {
        self.original_partition
    }

    pub fn original_timestamp(&self) -> Option<i64> {
        self.original_timestamp
    }

    pub fn original_payload(&self) -> Option<&str> {
        self.original_payload.as_deref()
    }

    pub fn original_headers(&self) -> &BTreeMap<String, String> {
        &self.original_headers
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn error_class(&self) -> &str {
        &self.error_class
    }

    pub fn error_stack_trace(&self) -> Option<&str> {
        self.error_stack_trace.as_deref()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn consumer_group_id(&self) -> &str {
        &self.consumer_group_id
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn additional_context(&self) -> &HashMap<String, ContextValue> {
        &self.additional_context
    }

    pub fn context(&self, key: &str) -> Option<&ContextValue> {
        self.additional_context.get(key)
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.context("truncated"), Some(ContextValue::Flag(true)))
    }

    /// Smaller copy without the raw payload and stack trace, flagged as truncated.
    pub fn truncated(&self) -> Self {
        let mut copy = self.clone();
        copy.original_payload = None;
        copy.error_stack_trace = None;
        copy.additional_context
            .insert("truncated".to_string(), ContextValue::Flag(true));
        copy
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetterRecordBuilder {
    record: DeadLetterRecord,
}

impl DeadLetterRecordBuilder {
    pub fn new(original_topic: impl Into<String>) -> Self {
        Self {
            record: DeadLetterRecord {
                envelope: None,
                original_topic: original_topic.into(),
                original_key: None,
                original_offset: -1,
                original_partition: -1,
                original_timestamp: None,
                original_payload: None,
                original_headers: BTreeMap::new(),
                error_message: String::new(),
                error_class: String::new(),
                error_stack_trace: None,
                retry_attempts: 0,
                consumer_group_id: String::new(),
                consumer_id: String::new(),
                timestamp: Utc::now(),
                additional_context: HashMap::new(),
            },
        }
    }

    pub fn envelope(mut self, envelope: Option<EnvelopeMetadata>) -> Self {
        self.record.envelope = envelope;
        self
    }

    pub fn position(mut self, partition: i32, offset: i64) -> Self {
        self.record.original_partition = partition;
        self.record.original_offset = offset;
        self
    }

    pub fn key(mut self, key: Option<String>) -> Self {
        self.record.original_key = key;
        self
    }

    pub fn original_timestamp(mut self, timestamp: Option<i64>) -> Self {
        self.record.original_timestamp = timestamp;
        self
    }

    pub fn payload(mut self, payload_base64: Option<String>) -> Self {
        self.record.original_payload = payload_base64;
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.record.original_headers = headers;
        self
    }

    pub fn error(mut self, class: impl Into<String>, message: impl Into<String>) -> Self {
        self.record.error_class = class.into();
        self.record.error_message = message.into();
        self
    }

    pub fn stack_trace(mut self, trace: Option<String>) -> Self {
        self.record.error_stack_trace = trace;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.record.retry_attempts = attempts;
        self
    }

    pub fn consumer(mut self, group_id: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        self.record.consumer_group_id = group_id.into();
        self.record.consumer_id = consumer_id.into();
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.record.additional_context.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> DeadLetterRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeadLetterRecord {
        DeadLetterRecord::builder("user-create-json")
            .position(2, 41)
            .key(Some("7".to_string()))
            .payload(Some("eyJ9".to_string()))
            .error("Processing", "handler exploded")
            .stack_trace(Some("caused by: io".to_string()))
            .retry_attempts(3)
            .consumer("event-relay", "host-1")
            .context("error_handling_thread", "worker-0")
            .build()
    }

    #[test]
    fn builder_sets_fields() {
        let record = sample();
        assert_eq!(record.original_topic(), "user-create-json");
        assert_eq!(record.original_partition(), 2);
        assert_eq!(record.original_offset(), 41);
        assert_eq!(record.original_key(), Some("7"));
        assert_eq!(record.retry_attempts(), 3);
        assert_eq!(record.error_class(), "Processing");
        assert_eq!(
            record.context("error_handling_thread"),
            Some(&ContextValue::Text("worker-0".to_string()))
        );
        assert!(!record.is_truncated());
    }

    #[test]
    fn truncation_drops_payload_and_trace() {
        let record = sample();
        let small = record.truncated();
        assert!(small.is_truncated());
        assert!(small.original_payload().is_none());
        assert!(small.error_stack_trace().is_none());
        assert_eq!(small.error_message(), record.error_message());
        assert_eq!(small.retry_attempts(), 3);
    }
}
