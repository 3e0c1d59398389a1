use async_trait::async_trait;
use rdkafka::{
    client::ClientContext,
    consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header, Headers, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    Message, Offset, TopicPartitionList,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::codec::CodecError;
use crate::infrastructure::kafka_config::KafkaConfig;
use crate::infrastructure::ledger::LedgerError;

/// Header carrying the publisher's idempotency key.
pub const MESSAGE_ID_HEADER: &str = "message-id";

/// Stable classification of consumer failures, matched against the deny-list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ErrorClass {
    InvalidArgument,
    NullReference,
    UnsupportedOperation,
    Deserialization,
    Broker,
    Timeout,
    Storage,
    Processing,
    Security,
    ResourceExhausted,
}

impl ErrorClass {
    /// Conditions a retry cannot fix. The consumer is stopped instead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorClass::Security | ErrorClass::ResourceExhausted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusKafkaError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Producer error: {0}")]
    Producer(String),
    #[error("Consumer error: {0}")]
    Consumer(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Kafka is disabled")]
    Disabled,
}

impl From<KafkaError> for EventBusKafkaError {
    fn from(error: KafkaError) -> Self {
        match error {
            KafkaError::ClientCreation(e) => EventBusKafkaError::Connection(e),
            KafkaError::ClientConfig(..) => EventBusKafkaError::Configuration(error.to_string()),
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
                EventBusKafkaError::Timeout(error.to_string())
            }
            KafkaError::MessageProduction(_) => EventBusKafkaError::Producer(error.to_string()),
            _ => EventBusKafkaError::Consumer(error.to_string()),
        }
    }
}

/// Failures raised while consuming a record. These are the only errors that
/// reach the retry and dead-letter machinery.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("missing value: {0}")]
    NullReference(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("failed to decode record: {0}")]
    Deserialization(#[from] CodecError),
    #[error("broker error: {0}")]
    Broker(#[from] KafkaError),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("ledger error: {0}")]
    Storage(#[from] LedgerError),
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("security failure: {0}")]
    Security(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ConsumerError {
    pub fn error_class(&self) -> ErrorClass {
        match self {
            ConsumerError::InvalidArgument(_) => ErrorClass::InvalidArgument,
            ConsumerError::NullReference(_) => ErrorClass::NullReference,
            ConsumerError::UnsupportedOperation(_) => ErrorClass::UnsupportedOperation,
            ConsumerError::Deserialization(_) => ErrorClass::Deserialization,
            ConsumerError::Broker(e) => classify_kafka_error(e),
            ConsumerError::Timeout(_) => ErrorClass::Timeout,
            ConsumerError::Storage(_) => ErrorClass::Storage,
            ConsumerError::Processing(_) => ErrorClass::Processing,
            ConsumerError::Security(_) => ErrorClass::Security,
            ConsumerError::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_class().is_fatal()
    }
}

fn classify_kafka_error(error: &KafkaError) -> ErrorClass {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => ErrorClass::Security,
        Some(
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::OperationTimedOut,
        ) => ErrorClass::Timeout,
        _ => ErrorClass::Broker,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    fn as_list(&self) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        list.add_partition(&self.topic, self.partition);
        list
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record to be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Broker acknowledgement for a produced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait KafkaProducerTrait: Send + Sync {
    async fn publish_binary_event(
        &self,
        message: &OutboundMessage,
    ) -> Result<DeliveryReport, EventBusKafkaError>;
}

#[derive(Clone)]
pub struct KafkaProducer {
    producer: Option<FutureProducer>,
    delivery_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig, delivery_timeout: Duration) -> Result<Self, EventBusKafkaError> {
        if !config.enabled {
            tracing::warn!("KafkaProducer: Kafka disabled, sends will be rejected");
            return Ok(Self {
                producer: None,
                delivery_timeout,
            });
        }

        let producer: FutureProducer = config.producer_client_config().create()?;
        tracing::info!(
            "KafkaProducer: created producer for {}",
            config.bootstrap_servers
        );
        Ok(Self {
            producer: Some(producer),
            delivery_timeout,
        })
    }
}

#[async_trait]
impl KafkaProducerTrait for KafkaProducer {
    async fn publish_binary_event(
        &self,
        message: &OutboundMessage,
    ) -> Result<DeliveryReport, EventBusKafkaError> {
        let producer = self.producer.as_ref().ok_or(EventBusKafkaError::Disabled)?;

        let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(&message.topic)
            .payload(message.payload.as_slice())
            .headers(headers);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        let (partition, offset) = producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(e, _)| EventBusKafkaError::from(e))?;

        Ok(DeliveryReport { partition, offset })
    }
}

/// A consumed record, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
    pub timestamp: Option<i64>,
}

impl InboundRecord {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload),
            headers: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn from_message<M: Message>(message: &M) -> Self {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| {
                        let value = h
                            .value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        (h.key.to_string(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(|p| p.to_vec()),
            headers,
            timestamp: message.timestamp().to_millis(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Idempotency key: the `message-id` header, else the record key, else
    /// `topic-partition-offset`.
    pub fn message_id(&self) -> String {
        if let Some(id) = self.header(MESSAGE_ID_HEADER).filter(|v| !v.is_empty()) {
            return id.to_string();
        }
        match self.key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => self.position_id(),
        }
    }

    /// `topic-partition-offset`. Used to key retry tracking.
    pub fn position_id(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Flow control over the consumer that delivered a record.
pub trait ConsumerControl: Send + Sync {
    fn pause(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError>;
    fn resume(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError>;
    /// Rewind so the record at `offset` is delivered again.
    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError>;
    /// Commit `offset` as processed.
    fn commit(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError>;
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

pub struct LoggingConsumerContext;

impl ClientContext for LoggingConsumerContext {}

impl ConsumerContext for LoggingConsumerContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        tracing::info!("Pre-rebalance: {:?}", rebalance);
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        tracing::info!("Post-rebalance: {:?}", rebalance);
    }
}

pub type LoggingConsumer = StreamConsumer<LoggingConsumerContext>;

/// [`ConsumerControl`] backed by an rdkafka stream consumer.
pub struct KafkaConsumerControl {
    consumer: Arc<LoggingConsumer>,
    stopped: AtomicBool,
    stop_token: CancellationToken,
}

impl KafkaConsumerControl {
    pub fn new(consumer: Arc<LoggingConsumer>, stop_token: CancellationToken) -> Self {
        Self {
            consumer,
            stopped: AtomicBool::new(false),
            stop_token,
        }
    }
}

impl ConsumerControl for KafkaConsumerControl {
    fn pause(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError> {
        self.consumer.pause(&tp.as_list())?;
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError> {
        self.consumer.resume(&tp.as_list())?;
        Ok(())
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError> {
        self.consumer.seek(
            &tp.topic,
            tp.partition,
            Offset::Offset(offset),
            Duration::from_secs(5),
        )?;
        Ok(())
    }

    fn commit(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&list, CommitMode::Async)?;
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::error!("KafkaConsumer: stopping consumer container");
            self.consumer.unsubscribe();
            self.stop_token.cancel();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_prefers_header_then_key() {
        let bare = InboundRecord::new("user-create-json", 3, 17, vec![]);
        assert_eq!(bare.message_id(), "user-create-json-3-17");

        let keyed = bare.clone().with_key("42");
        assert_eq!(keyed.message_id(), "42");

        let stamped = keyed.with_header(MESSAGE_ID_HEADER, "evt-1");
        assert_eq!(stamped.message_id(), "evt-1");
        assert_eq!(stamped.position_id(), "user-create-json-3-17");
    }

    #[test]
    fn empty_key_falls_back_to_position() {
        let record = InboundRecord::new("t", 0, 1, vec![]).with_key("");
        assert_eq!(record.message_id(), "t-0-1");
    }

    #[test]
    fn error_classes() {
        assert_eq!(
            ConsumerError::InvalidArgument("x".into()).error_class(),
            ErrorClass::InvalidArgument
        );
        assert!(ConsumerError::Security("denied".into()).is_fatal());
        assert!(ConsumerError::ResourceExhausted("oom".into()).is_fatal());
        assert!(!ConsumerError::Processing("boom".into()).is_fatal());

        let auth = ConsumerError::Broker(KafkaError::MessageConsumption(
            RDKafkaErrorCode::TopicAuthorizationFailed,
        ));
        assert_eq!(auth.error_class(), ErrorClass::Security);

        let transient = ConsumerError::Broker(KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure,
        ));
        assert_eq!(transient.error_class(), ErrorClass::Broker);
    }

    #[test]
    fn error_class_parses_from_config() {
        assert_eq!("nullreference".parse::<ErrorClass>().ok(), Some(ErrorClass::NullReference));
        assert_eq!(ErrorClass::Deserialization.to_string(), "Deserialization");
    }
}
