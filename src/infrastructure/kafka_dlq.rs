use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::DeadLetterRecord;
use crate::infrastructure::codec;
use crate::infrastructure::kafka_abstraction::{ConsumerError, InboundRecord};
use crate::infrastructure::kafka_consumer::RecordProcessor;
use crate::infrastructure::kafka_error_handler::dead_letter_format;

/// Reads dead-letter topics for operators. Every record is acknowledged,
/// including ones that fail to decode, so the observer can never loop.
#[derive(Debug, Default)]
pub struct DeadLetterObserver {
    by_class: DashMap<String, u64>,
    undecodable: AtomicU64,
}

impl DeadLetterObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and logs one dead-letter record.
    pub fn observe(&self, record: &InboundRecord) -> Option<DeadLetterRecord> {
        let format = dead_letter_format(&record.topic);
        let decoded = record
            .payload
            .as_deref()
            .ok_or(codec::CodecError::EmptyPayload)
            .and_then(|payload| codec::decode_dead_letter(format, payload));

        let dead_letter = match decoded {
            Ok(dead_letter) => dead_letter,
            Err(e) => {
                self.undecodable.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Could not decode dead-letter record from {} (partition {}, offset {}): {}",
                    record.topic,
                    record.partition,
                    record.offset,
                    e
                );
                return None;
            }
        };

        *self
            .by_class
            .entry(dead_letter.error_class().to_string())
            .or_insert(0) += 1;

        tracing::warn!(
            error_class = dead_letter.error_class(),
            original_topic = dead_letter.original_topic(),
            original_offset = dead_letter.original_offset(),
            retry_attempts = dead_letter.retry_attempts(),
            truncated = dead_letter.is_truncated(),
            "Dead-letter record on {}: {}",
            record.topic,
            dead_letter.error_message()
        );
        if let Some(envelope) = dead_letter.envelope() {
            tracing::info!(
                "Dead-lettered envelope: eventId={}, eventType={}, entityType={}, traceId={}",
                envelope.event_id,
                envelope.event_type,
                envelope.entity_type,
                envelope.trace_id
            );
        }
        Some(dead_letter)
    }

    pub fn counts_by_class(&self) -> BTreeMap<String, u64> {
        self.by_class
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn undecodable(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordProcessor for DeadLetterObserver {
    async fn process(&self, record: &InboundRecord) -> Result<(), ConsumerError> {
        self.observe(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventFormat;

    #[test]
    fn test_counts_by_error_class() {
        let observer = DeadLetterObserver::new();
        let dead_letter = DeadLetterRecord::builder("user-create-json")
            .position(0, 3)
            .error("Deserialization", "bad json")
            .retry_attempts(3)
            .build();
        let payload = codec::encode_dead_letter(EventFormat::Json, &dead_letter).unwrap();
        let record = InboundRecord::new("user-create-json-dlt", 0, 0, payload);

        let observed = observer.observe(&record).unwrap();

        assert_eq!(observed.original_offset(), 3);
        assert_eq!(observer.counts_by_class().get("Deserialization"), Some(&1));
    }

    #[tokio::test]
    async fn test_garbage_is_acknowledged() {
        let observer = DeadLetterObserver::new();
        let record = InboundRecord::new("user-create-avro-dlt", 0, 0, vec![0xff; 3]);

        assert!(observer.process(&record).await.is_ok());
        assert_eq!(observer.undecodable(), 1);
        assert!(observer.counts_by_class().is_empty());
    }
}
