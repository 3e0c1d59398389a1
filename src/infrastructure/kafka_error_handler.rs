use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{DeadLetterRecord, EventFormat};
use crate::infrastructure::codec;
use crate::infrastructure::config::ErrorHandlingConfig;
use crate::infrastructure::kafka_abstraction::{
    ConsumerControl, ConsumerError, EventBusKafkaError, InboundRecord, KafkaProducerTrait,
    OutboundMessage, MESSAGE_ID_HEADER,
};
use crate::infrastructure::kafka_metrics::KafkaMetrics;
use crate::infrastructure::resume_scheduler::ResumeScheduler;
use crate::infrastructure::topics::dead_letter_topic;

#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    attempts: u32,
    last_update: Instant,
}

/// What the consumer should do with the failed record's offset.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Partition paused and rewound. The offset must not be committed.
    Retry { attempt: u32, delay: Duration },
    /// Routed to the dead-letter topic. Commit the original offset.
    DeadLettered { topic: String, attempts: u32 },
    /// Given up without a dead-letter write. Commit the original offset.
    Dropped { attempts: u32 },
}

impl RecoveryAction {
    pub fn should_commit(&self) -> bool {
        !matches!(self, RecoveryAction::Retry { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStatistics {
    pub active_retry_attempts: usize,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Retry and dead-letter decisions for consumer-level failures.
///
/// Attempts are tracked per `topic-partition-offset`. A retryable failure
/// pauses the partition and schedules a resume with exponential backoff;
/// once `max_attempts` retries have been spent, or immediately for a
/// deny-listed error class, the record goes to `<topic><suffix>`.
pub struct KafkaErrorHandler {
    config: ErrorHandlingConfig,
    dead_letters: Arc<dyn KafkaProducerTrait>,
    metrics: Arc<KafkaMetrics>,
    retry_attempts: DashMap<String, RetryEntry>,
    consumer_group_id: String,
    consumer_id: String,
}

impl KafkaErrorHandler {
    pub fn new(
        config: ErrorHandlingConfig,
        dead_letters: Arc<dyn KafkaProducerTrait>,
        metrics: Arc<KafkaMetrics>,
        consumer_group_id: impl Into<String>,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        Self {
            config,
            dead_letters,
            metrics,
            retry_attempts: DashMap::new(),
            consumer_group_id: consumer_group_id.into(),
            consumer_id: format!("consumer-{}-{}", host, std::process::id()),
        }
    }

    pub fn config(&self) -> &ErrorHandlingConfig {
        &self.config
    }

    pub async fn handle_one(
        &self,
        error: &ConsumerError,
        record: &InboundRecord,
        control: &dyn ConsumerControl,
        resumes: &ResumeScheduler,
    ) -> RecoveryAction {
        let message_id = record.position_id();
        let class = error.error_class();
        tracing::error!(
            topic = %record.topic,
            key = record.key.as_deref().unwrap_or("null"),
            message_id = %message_id,
            error_class = %class,
            "Error processing message: {}",
            error
        );
        if self.config.monitoring.enabled {
            self.metrics
                .record_error(&record.topic, class, &error.to_string());
        }

        if self.should_retry(&message_id, error) {
            match self.handle_retry(record, &message_id, control, resumes) {
                Ok(action) => return action,
                Err(e) => tracing::error!(
                    "Could not pause {} for retry, dead-lettering instead: {}",
                    record.topic_partition(),
                    e
                ),
            }
        }

        self.handle_dead_letter(error, record, &message_id).await
    }

    /// Broker-client failures outside a single record. Fatal classes stop
    /// the consumer. Returns whether it was stopped.
    pub fn handle_other_exception(&self, error: &ConsumerError, control: &dyn ConsumerControl) -> bool {
        tracing::error!("Error in Kafka consumer: {}", error);
        if error.is_fatal() {
            tracing::error!(
                "Fatal error detected ({}), stopping consumer",
                error.error_class()
            );
            control.stop();
            return true;
        }
        false
    }

    pub fn is_non_retryable(&self, error: &ConsumerError) -> bool {
        self.config
            .retry
            .non_retryable_exceptions
            .contains(&error.error_class())
    }

    fn should_retry(&self, message_id: &str, error: &ConsumerError) -> bool {
        if self.is_non_retryable(error) {
            tracing::warn!(
                "Non-retryable exception for messageId={}: {}",
                message_id,
                error.error_class()
            );
            return false;
        }
        self.attempts(message_id) < self.config.retry.max_attempts
    }

    /// `initial * multiplier^(attempt-1)`, capped at the configured maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let retry = &self.config.retry;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = retry.initial_delay_ms as f64 * retry.multiplier.powi(exponent);
        let capped = raw.min(retry.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn handle_retry(
        &self,
        record: &InboundRecord,
        message_id: &str,
        control: &dyn ConsumerControl,
        resumes: &ResumeScheduler,
    ) -> Result<RecoveryAction, EventBusKafkaError> {
        let tp = record.topic_partition();
        control.pause(&tp)?;
        control.seek(&tp, record.offset)?;

        let attempt = {
            let mut entry = self
                .retry_attempts
                .entry(message_id.to_string())
                .or_insert(RetryEntry {
                    attempts: 0,
                    last_update: Instant::now(),
                });
            entry.attempts += 1;
            entry.last_update = Instant::now();
            entry.attempts
        };

        let delay = self.backoff_delay(attempt);
        if self.config.monitoring.log_retry_attempts {
            tracing::warn!(
                "Retrying message: Topic={}, Key={}, MessageId={}, Attempt={}/{}, Delay={}ms",
                record.topic,
                record.key.as_deref().unwrap_or("null"),
                message_id,
                attempt,
                self.config.retry.max_attempts,
                delay.as_millis()
            );
        }

        if !resumes.schedule(tp.clone(), delay) {
            tracing::error!("Resume scheduler is gone, resuming {} immediately", tp);
            control.resume(&tp)?;
        }

        Ok(RecoveryAction::Retry { attempt, delay })
    }

    async fn handle_dead_letter(
        &self,
        error: &ConsumerError,
        record: &InboundRecord,
        message_id: &str,
    ) -> RecoveryAction {
        let attempts = self.attempts(message_id);
        self.retry_attempts.remove(message_id);

        if !self.config.dlt.enabled {
            tracing::warn!(
                "Dead-letter routing disabled, dropping message: Topic={}, MessageId={}, Attempts={}",
                record.topic,
                message_id,
                attempts
            );
            return RecoveryAction::Dropped { attempts };
        }

        let dlt_topic = dead_letter_topic(&record.topic, &self.config.dlt.suffix);
        let format = dead_letter_format(&record.topic);
        let dead_letter = self.build_dead_letter(error, record, attempts);

        let payload = match self.encode_within_limit(format, &dead_letter) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    "Failed to encode dead-letter record for {}: {}",
                    message_id,
                    e
                );
                return RecoveryAction::Dropped { attempts };
            }
        };

        let mut message = OutboundMessage::new(dlt_topic.clone(), record.key.clone(), payload);
        if let Some(id) = record.header(MESSAGE_ID_HEADER) {
            message = message.with_header(MESSAGE_ID_HEADER, id);
        }

        match self.dead_letters.publish_binary_event(&message).await {
            Ok(report) => {
                if self.config.monitoring.log_dlt_messages {
                    tracing::warn!(
                        "Sent message to DLT: OriginalTopic={}, DltTopic={}, MessageId={}, Attempts={}, Offset={}",
                        record.topic,
                        dlt_topic,
                        message_id,
                        attempts,
                        report.offset
                    );
                }
                RecoveryAction::DeadLettered {
                    topic: dlt_topic,
                    attempts,
                }
            }
            Err(e) => {
                // Never re-dead-letter.
                tracing::error!(
                    "Failed to send message to DLT: Topic={}, MessageId={}: {}",
                    dlt_topic,
                    message_id,
                    e
                );
                RecoveryAction::Dropped { attempts }
            }
        }
    }

    fn build_dead_letter(
        &self,
        error: &ConsumerError,
        record: &InboundRecord,
        attempts: u32,
    ) -> DeadLetterRecord {
        let envelope = record
            .payload
            .as_deref()
            .and_then(|p| codec::decode_metadata(EventFormat::from_topic(&record.topic), p).ok())
            .map(|metadata| metadata.redelivered(attempts));

        let headers: BTreeMap<String, String> = if self.config.dlt.include_headers {
            record.headers.iter().cloned().collect()
        } else {
            BTreeMap::new()
        };

        let stack_trace = self
            .config
            .dlt
            .include_stack_trace
            .then(|| error_chain(error));

        let thread = std::thread::current();
        let thread_name = thread
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", thread.id()));

        DeadLetterRecord::builder(record.topic.clone())
            .envelope(envelope)
            .position(record.partition, record.offset)
            .key(record.key.clone())
            .original_timestamp(record.timestamp)
            .payload(record.payload.as_deref().map(|p| BASE64.encode(p)))
            .headers(headers)
            .error(error.error_class().to_string(), error.to_string())
            .stack_trace(stack_trace)
            .retry_attempts(attempts)
            .consumer(self.consumer_group_id.clone(), self.consumer_id.clone())
            .context("error_handling_timestamp", Utc::now().timestamp_millis())
            .context("error_handling_thread", thread_name)
            .build()
    }

    fn encode_within_limit(
        &self,
        format: EventFormat,
        record: &DeadLetterRecord,
    ) -> Result<Vec<u8>, codec::CodecError> {
        let payload = codec::encode_dead_letter(format, record)?;
        if payload.len() <= self.config.dlt.max_message_size {
            return Ok(payload);
        }

        tracing::warn!(
            "Dead-letter record for {} is {} bytes, over the {} byte limit; truncating",
            record.original_topic(),
            payload.len(),
            self.config.dlt.max_message_size
        );
        codec::encode_dead_letter(format, &record.truncated())
    }

    fn attempts(&self, message_id: &str) -> u32 {
        self.retry_attempts
            .get(message_id)
            .map(|e| e.attempts)
            .unwrap_or(0)
    }

    /// Forget tracking for a record that has now been processed.
    pub fn clear_retry(&self, record: &InboundRecord) {
        self.retry_attempts.remove(&record.position_id());
    }

    /// Drops entries not updated within the retention window.
    pub fn cleanup_retry_attempts(&self) -> usize {
        let retention = self.config.retry_retention();
        let before = self.retry_attempts.len();
        self.retry_attempts
            .retain(|_, entry| entry.last_update.elapsed() <= retention);
        let removed = before.saturating_sub(self.retry_attempts.len());
        if removed > 0 {
            tracing::debug!("Cleaned up {} retry attempt entries", removed);
        }
        removed
    }

    pub fn spawn_retry_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.cleanup_retry_attempts();
                    }
                }
            }
        })
    }

    pub fn retry_statistics(&self) -> RetryStatistics {
        RetryStatistics {
            active_retry_attempts: self.retry_attempts.len(),
            max_retry_attempts: self.config.retry.max_attempts,
            retry_delay_ms: self.config.retry.initial_delay_ms,
        }
    }
}

/// Dead-letter topics reuse the original topic's serializer, chosen by
/// substring.
pub fn dead_letter_format(topic: &str) -> EventFormat {
    if topic.contains("json") {
        EventFormat::Json
    } else if topic.contains("string") {
        EventFormat::String
    } else {
        EventFormat::Avro
    }
}

fn error_chain(error: &dyn StdError) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{DeadLetterConfig, RetryConfig};
    use crate::infrastructure::kafka_in_memory::InMemoryKafkaProducer;

    fn handler(config: ErrorHandlingConfig) -> KafkaErrorHandler {
        KafkaErrorHandler::new(
            config,
            Arc::new(InMemoryKafkaProducer::new()),
            Arc::new(KafkaMetrics::new()),
            "event-relay-group",
        )
    }

    #[test]
    fn backoff_grows_then_caps() {
        let handler = handler(ErrorHandlingConfig::with_defaults());
        let delays: Vec<u64> = (1..=6)
            .map(|a| handler.backoff_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn deny_list_matches_error_class() {
        let handler = handler(ErrorHandlingConfig::with_defaults());
        assert!(handler.is_non_retryable(&ConsumerError::InvalidArgument("bad".into())));
        assert!(handler.is_non_retryable(&ConsumerError::NullReference("none".into())));
        assert!(!handler.is_non_retryable(&ConsumerError::Processing("flaky".into())));
    }

    #[test]
    fn dlt_format_by_substring() {
        assert_eq!(dead_letter_format("user-create-json"), EventFormat::Json);
        assert_eq!(dead_letter_format("user-create-string"), EventFormat::String);
        assert_eq!(dead_letter_format("user-create-avro"), EventFormat::Avro);
        assert_eq!(dead_letter_format("legacy"), EventFormat::Avro);
    }

    #[test]
    fn stack_trace_is_source_chain() {
        let inner = serde_json::from_str::<u32>("x").unwrap_err();
        let error = ConsumerError::Deserialization(codec::CodecError::Json(inner));
        let trace = error_chain(&error);
        assert!(trace.starts_with("failed to decode record"));
        assert!(trace.contains("caused by: json codec"));
    }

    #[test]
    fn oversized_records_are_truncated() {
        let config = ErrorHandlingConfig::new(
            RetryConfig::default(),
            DeadLetterConfig {
                max_message_size: 600,
                include_stack_trace: true,
                ..DeadLetterConfig::default()
            },
        );
        let handler = handler(config);
        let record = InboundRecord::new("user-create-json", 0, 3, vec![b'x'; 4096]);
        let dead_letter = handler.build_dead_letter(&ConsumerError::Processing("boom".into()), &record, 3);

        let bytes = handler
            .encode_within_limit(EventFormat::Json, &dead_letter)
            .unwrap();
        let decoded = codec::decode_dead_letter(EventFormat::Json, &bytes).unwrap();
        assert!(decoded.is_truncated());
        assert!(decoded.original_payload().is_none());
        assert!(decoded.error_stack_trace().is_none());
        assert_eq!(decoded.retry_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_stale_entries() {
        let handler = handler(ErrorHandlingConfig::with_defaults());
        handler.retry_attempts.insert(
            "t-0-1".to_string(),
            RetryEntry {
                attempts: 1,
                last_update: Instant::now(),
            },
        );

        tokio::time::advance(Duration::from_secs(1800)).await;
        handler.retry_attempts.insert(
            "t-0-2".to_string(),
            RetryEntry {
                attempts: 2,
                last_update: Instant::now(),
            },
        );
        assert_eq!(handler.cleanup_retry_attempts(), 0);

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(handler.cleanup_retry_attempts(), 1);
        assert_eq!(handler.retry_statistics().active_retry_attempts, 1);
    }
}
