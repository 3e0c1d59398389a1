pub mod codec;
pub mod config;
pub mod kafka_abstraction;
pub mod kafka_config;
pub mod kafka_consumer;
pub mod kafka_dlq;
pub mod kafka_error_handler;
pub mod kafka_in_memory;
pub mod kafka_metrics;
pub mod kafka_monitoring;
pub mod kafka_producer;
pub mod ledger;
pub mod logging;
pub mod resume_scheduler;
pub mod topics;

pub use config::AppConfig;
pub use kafka_abstraction::{
    ConsumerControl, ConsumerError, ErrorClass, EventBusKafkaError, InboundRecord,
    KafkaProducer, KafkaProducerTrait, TopicPartition,
};
pub use kafka_config::KafkaConfig;
pub use kafka_consumer::{ConsumerWorker, KafkaEventConsumer, RecordProcessor};
pub use kafka_dlq::DeadLetterObserver;
pub use kafka_error_handler::KafkaErrorHandler;
pub use kafka_metrics::KafkaMetrics;
pub use kafka_monitoring::MonitoringService;
pub use kafka_producer::EventProducer;
pub use ledger::{InMemoryLedger, PostgresLedger, ProcessedMessageLedger};
pub use topics::TopicsProvider;
