pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod web;

// Re-export commonly used types
pub use application::{
    ConsumerDispatcher, EntityHandler, EntityPublisher, EventHandler, EventPublisher,
    HandlerRegistry,
};
pub use domain::{Envelope, EnvelopeFactory, EventFormat, Operation};
pub use infrastructure::{
    AppConfig, EventProducer, KafkaConfig, KafkaErrorHandler, KafkaMetrics, MonitoringService,
    ProcessedMessageLedger,
};
