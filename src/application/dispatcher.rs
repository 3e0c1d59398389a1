use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

use crate::application::handlers::{Disposition, HandlerError};
use crate::application::registry::HandlerRegistry;
use crate::domain::{EventFormat, ProcessedMessageRecord};
use crate::infrastructure::codec::CodecError;
use crate::infrastructure::kafka_abstraction::{ConsumerError, InboundRecord};
use crate::infrastructure::kafka_consumer::RecordProcessor;
use crate::infrastructure::kafka_metrics::KafkaMetrics;
use crate::infrastructure::ledger::ProcessedMessageLedger;
use crate::infrastructure::topics::entity_type_from_topic;

/// Result of dispatching one record. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Processed { message_id: String, operation: String },
    /// Already in the ledger.
    Duplicate { message_id: String },
    /// No handler registered for the topic's entity type.
    Unroutable { entity_type: String },
    /// Empty envelope or unknown operation.
    Skipped { message_id: String },
    /// The business callback failed. Logged, not recorded, not retried.
    HandlerFailed { message_id: String },
}

/// Routes consumed records to the registered handlers.
///
/// Only consumer-level failures come back as errors: an undecodable or
/// unmappable payload, or a ledger failure. Those feed the retry and
/// dead-letter path.
#[derive(Clone)]
pub struct ConsumerDispatcher {
    registry: Arc<HandlerRegistry>,
    ledger: Arc<dyn ProcessedMessageLedger>,
    metrics: Arc<KafkaMetrics>,
}

impl ConsumerDispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        ledger: Arc<dyn ProcessedMessageLedger>,
        metrics: Arc<KafkaMetrics>,
    ) -> Self {
        Self {
            registry,
            ledger,
            metrics,
        }
    }

    pub async fn dispatch(&self, record: &InboundRecord) -> Result<DispatchOutcome, ConsumerError> {
        let started = Instant::now();
        let message_id = record.message_id();

        if self.ledger.exists(&message_id).await? {
            tracing::info!(
                message_id = %message_id,
                "Message already processed, skipping: topic={}, partition={}, offset={}",
                record.topic,
                record.partition,
                record.offset
            );
            return Ok(DispatchOutcome::Duplicate { message_id });
        }

        let entity_type = entity_type_from_topic(&record.topic).to_lowercase();
        let Some(handler) = self.registry.get(&entity_type) else {
            tracing::warn!(
                "No handler found for entity type '{}' on topic {}",
                entity_type,
                record.topic
            );
            return Ok(DispatchOutcome::Unroutable { entity_type });
        };

        let payload = record
            .payload
            .as_deref()
            .ok_or(ConsumerError::Deserialization(CodecError::EmptyPayload))?;
        let format = EventFormat::from_topic(&record.topic);
        tracing::debug!(
            message_id = %message_id,
            "Dispatching {} record from {} to {} handler",
            format,
            record.topic,
            handler.entity_type()
        );

        let report = match handler.handle(format, payload, &record.topic).await {
            Ok(report) => report,
            Err(HandlerError::Decode(e)) => return Err(ConsumerError::Deserialization(e)),
            Err(HandlerError::InvalidPayload { entity_type, reason }) => {
                return Err(ConsumerError::InvalidArgument(format!(
                    "{} payload on {}: {}",
                    entity_type, record.topic, reason
                )));
            }
            Err(HandlerError::Callback(e)) => {
                tracing::error!(
                    message_id = %message_id,
                    "Handler for {} failed on topic {} (partition {}, offset {}): {:#}",
                    entity_type,
                    record.topic,
                    record.partition,
                    record.offset,
                    e
                );
                return Ok(DispatchOutcome::HandlerFailed { message_id });
            }
        };

        let operation = match report.disposition {
            Disposition::Applied(operation) => operation.as_str().to_string(),
            Disposition::EmptyPayload | Disposition::UnknownOperation(_) => {
                return Ok(DispatchOutcome::Skipped { message_id });
            }
        };

        let processed = ProcessedMessageRecord::new(
            message_id.clone(),
            record.topic.clone(),
            record.partition,
            record.offset,
            operation.clone(),
            entity_type,
        );
        self.ledger.record(&processed).await?;

        self.metrics.record_consumer_message(
            &record.topic,
            record.key.as_deref().unwrap_or(""),
            record.payload_len(),
            started.elapsed(),
        );
        tracing::info!(
            message_id = %message_id,
            "Processed {} event from topic={}, partition={}, offset={}",
            operation,
            record.topic,
            record.partition,
            record.offset
        );

        Ok(DispatchOutcome::Processed {
            message_id,
            operation,
        })
    }
}

#[async_trait]
impl RecordProcessor for ConsumerDispatcher {
    async fn process(&self, record: &InboundRecord) -> Result<(), ConsumerError> {
        self.dispatch(record).await.map(|_| ())
    }
}
