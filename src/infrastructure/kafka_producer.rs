use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::{Envelope, EnvelopeFactory, EventFormat};
use crate::infrastructure::codec::{self, CodecError};
use crate::infrastructure::config::ProducerConfig;
use crate::infrastructure::kafka_abstraction::{
    DeliveryReport, ErrorClass, EventBusKafkaError, KafkaProducerTrait, OutboundMessage,
    MESSAGE_ID_HEADER,
};
use crate::infrastructure::kafka_metrics::KafkaMetrics;

/// Failure-counting breaker shared by every send.
///
/// Opens once `threshold` failures have accumulated and stays open until
/// `reset_window` has passed since the last failure. Successes decay the
/// failure count by one. Reads and writes are individually atomic, the
/// combination is not.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u64,
    reset_window: Duration,
    failures: AtomicU64,
    /// Millis since `origin` plus one. Zero means no failure recorded.
    last_failure: AtomicU64,
    origin: Instant,
}

impl CircuitBreaker {
    pub fn new(threshold: u64, reset_window: Duration) -> Self {
        Self {
            threshold,
            reset_window,
            failures: AtomicU64::new(0),
            last_failure: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    fn now_mark(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }

    /// Also closes the breaker when the reset window has elapsed.
    pub fn is_open(&self) -> bool {
        if self.failures.load(Ordering::SeqCst) < self.threshold {
            return false;
        }

        let last = self.last_failure.load(Ordering::SeqCst);
        let since_last = Duration::from_millis(self.now_mark().saturating_sub(last));
        if since_last < self.reset_window {
            return true;
        }

        self.failures.store(0, Ordering::SeqCst);
        tracing::info!("Circuit breaker reset after {} ms", since_last.as_millis());
        false
    }

    pub fn record_success(&self) {
        let _ = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.last_failure.store(self.now_mark(), Ordering::SeqCst);
    }

    /// Zero the failure count and forget the last failure.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.last_failure.store(0, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ProducerStats {
    total_sent: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl ProducerStats {
    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_sent();
        if total > 0 {
            self.successful() as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub total_messages_sent: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub success_rate_percent: f64,
    pub circuit_breaker_open: bool,
    pub circuit_breaker_failures: u64,
}

/// Outcome of a send call. Sends never block the caller.
#[derive(Debug)]
pub enum SendHandle {
    Dispatched(JoinHandle<Result<DeliveryReport, EventBusKafkaError>>),
    /// Dropped because the circuit breaker was open.
    Rejected,
}

impl SendHandle {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SendHandle::Rejected)
    }

    /// Waits for the delivery report. `None` when the send was rejected or
    /// the delivery task did not complete.
    pub async fn delivery(self) -> Option<Result<DeliveryReport, EventBusKafkaError>> {
        match self {
            SendHandle::Dispatched(handle) => handle.await.ok(),
            SendHandle::Rejected => None,
        }
    }
}

/// Fire-and-forget producer guarded by a circuit breaker.
#[derive(Clone)]
pub struct EventProducer {
    transport: Arc<dyn KafkaProducerTrait>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<ProducerStats>,
    metrics: Arc<KafkaMetrics>,
    factory: EnvelopeFactory,
}

impl EventProducer {
    pub fn new(
        transport: Arc<dyn KafkaProducerTrait>,
        config: &ProducerConfig,
        metrics: Arc<KafkaMetrics>,
    ) -> Self {
        Self {
            transport,
            breaker: Arc::new(CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_reset(),
            )),
            stats: Arc::new(ProducerStats::default()),
            metrics,
            factory: config.envelope_factory(),
        }
    }

    /// Factory carrying the configured envelope settings.
    pub fn envelope_factory(&self) -> &EnvelopeFactory {
        &self.factory
    }

    /// Encodes `envelope` for `format` and sends it with the event id as the
    /// `message-id` header.
    pub fn send_envelope<T: Serialize>(
        &self,
        topic: &str,
        key: Option<String>,
        envelope: &Envelope<T>,
        format: EventFormat,
    ) -> Result<SendHandle, CodecError> {
        let payload = codec::encode_envelope(format, envelope)?;
        let message = OutboundMessage::new(topic, key, payload)
            .with_header(MESSAGE_ID_HEADER, envelope.event_id.to_string());
        Ok(self.send(message, format))
    }

    /// Must be called from within a Tokio runtime.
    pub fn send(&self, message: OutboundMessage, format: EventFormat) -> SendHandle {
        let key = message.key.clone().unwrap_or_default();
        if self.breaker.is_open() {
            tracing::warn!(
                "Circuit breaker is open, skipping {} message to topic: {}",
                format,
                message.topic
            );
            return SendHandle::Rejected;
        }

        tracing::info!(
            "EventProducer: producing {} event to topic [{}] with key [{}]",
            format,
            message.topic,
            key
        );
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);

        let transport = self.transport.clone();
        let breaker = self.breaker.clone();
        let stats = self.stats.clone();
        let metrics = self.metrics.clone();
        let started = Instant::now();

        SendHandle::Dispatched(tokio::spawn(async move {
            let result = transport.publish_binary_event(&message).await;
            match &result {
                Ok(report) => {
                    stats.successful.fetch_add(1, Ordering::Relaxed);
                    breaker.record_success();
                    metrics.record_producer_message(
                        &message.topic,
                        &key,
                        message.payload.len(),
                        started.elapsed(),
                    );
                    tracing::info!(
                        "Successfully sent {} message to topic [{}] with offset [{}]",
                        format,
                        message.topic,
                        report.offset
                    );
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    breaker.record_failure();
                    let class = match e {
                        EventBusKafkaError::Timeout(_) => ErrorClass::Timeout,
                        EventBusKafkaError::Serialization(_) => ErrorClass::Deserialization,
                        _ => ErrorClass::Broker,
                    };
                    metrics.record_error(&message.topic, class, &e.to_string());
                    tracing::error!(
                        "Failed to send {} message to topic [{}] with key [{}]: {}",
                        format,
                        message.topic,
                        key,
                        e
                    );
                }
            }
            result
        }))
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    pub fn is_circuit_breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn circuit_breaker_failures(&self) -> u64 {
        self.breaker.failures()
    }

    pub fn status(&self) -> ProducerStatus {
        ProducerStatus {
            total_messages_sent: self.stats.total_sent(),
            successful_messages: self.stats.successful(),
            failed_messages: self.stats.failed(),
            success_rate_percent: self.stats.success_rate(),
            circuit_breaker_open: self.breaker.is_open(),
            circuit_breaker_failures: self.breaker.failures(),
        }
    }

    pub fn reset_circuit_breaker(&self) {
        tracing::warn!(
            "EventProducer: circuit breaker reset requested with {} failures",
            self.breaker.failures()
        );
        self.breaker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kafka_in_memory::InMemoryKafkaProducer;

    fn producer(transport: Arc<InMemoryKafkaProducer>) -> EventProducer {
        EventProducer::new(
            transport,
            &ProducerConfig::default(),
            Arc::new(KafkaMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_at_threshold_and_closes_after_window() {
        let breaker = CircuitBreaker::new(10, Duration::from_secs(300));
        for _ in 0..9 {
            breaker.record_failure();
        }
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_decays_failures() {
        let breaker = CircuitBreaker::new(10, Duration::from_secs(300));
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);

        for _ in 0..10 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.failures(), 9);
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_breaker() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(300));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test]
    async fn test_send_counts_success() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        let producer = producer(transport.clone());

        let handle = producer.send(
            OutboundMessage::new("user-create-json", Some("1".into()), b"{}".to_vec()),
            EventFormat::Json,
        );
        assert!(handle.delivery().await.unwrap().is_ok());

        let status = producer.status();
        assert_eq!(status.total_messages_sent, 1);
        assert_eq!(status.successful_messages, 1);
        assert_eq!(status.success_rate_percent, 100.0);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_drops_without_counting() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        transport.fail_sends(true);
        let producer = producer(transport.clone());

        for _ in 0..10 {
            let handle = producer.send(OutboundMessage::new("t", None, vec![1]), EventFormat::Avro);
            assert!(handle.delivery().await.unwrap().is_err());
        }
        assert!(producer.is_circuit_breaker_open());

        let dropped = producer.send(OutboundMessage::new("t", None, vec![1]), EventFormat::Avro);
        assert!(dropped.is_rejected());
        assert_eq!(producer.status().total_messages_sent, 10);
        assert_eq!(producer.status().failed_messages, 10);
        assert_eq!(producer.status().success_rate_percent, 0.0);

        tokio::time::advance(Duration::from_secs(300)).await;
        transport.fail_sends(false);
        let retried = producer.send(OutboundMessage::new("t", None, vec![1]), EventFormat::Avro);
        assert!(!retried.is_rejected());
        assert!(retried.delivery().await.unwrap().is_ok());
    }
}
