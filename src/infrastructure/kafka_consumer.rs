use async_trait::async_trait;
use rdkafka::consumer::Consumer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::kafka_abstraction::{
    ConsumerControl, ConsumerError, EventBusKafkaError, InboundRecord, KafkaConsumerControl,
    LoggingConsumer, LoggingConsumerContext,
};
use crate::infrastructure::kafka_config::KafkaConfig;
use crate::infrastructure::kafka_error_handler::{KafkaErrorHandler, RecoveryAction};
use crate::infrastructure::kafka_metrics::KafkaMetrics;
use crate::infrastructure::resume_scheduler::ResumeScheduler;

/// Processes one consumed record. An error hands the record to the
/// error handler.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(&self, record: &InboundRecord) -> Result<(), ConsumerError>;
}

/// What happened to a record's offset.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Committed,
    Recovered(RecoveryAction),
}

/// Broker-independent half of a consumer: process, then commit or recover.
#[derive(Clone)]
pub struct ConsumerWorker {
    processor: Arc<dyn RecordProcessor>,
    error_handler: Arc<KafkaErrorHandler>,
    control: Arc<dyn ConsumerControl>,
    resumes: ResumeScheduler,
}

impl ConsumerWorker {
    pub fn new(
        processor: Arc<dyn RecordProcessor>,
        error_handler: Arc<KafkaErrorHandler>,
        control: Arc<dyn ConsumerControl>,
        resumes: ResumeScheduler,
    ) -> Self {
        Self {
            processor,
            error_handler,
            control,
            resumes,
        }
    }

    /// Commits only after processing succeeded or the error handler has
    /// settled the record. A retry leaves the offset uncommitted.
    pub async fn handle_record(
        &self,
        record: &InboundRecord,
    ) -> Result<RecordOutcome, EventBusKafkaError> {
        match self.processor.process(record).await {
            Ok(()) => {
                self.error_handler.clear_retry(record);
                self.control
                    .commit(&record.topic_partition(), record.offset)?;
                Ok(RecordOutcome::Committed)
            }
            Err(error) => {
                let action = self
                    .error_handler
                    .handle_one(&error, record, self.control.as_ref(), &self.resumes)
                    .await;
                if action.should_commit() {
                    self.control
                        .commit(&record.topic_partition(), record.offset)?;
                }
                Ok(RecordOutcome::Recovered(action))
            }
        }
    }

    /// Failures outside any one record. Returns whether the consumer stopped.
    pub fn handle_consumer_error(&self, error: ConsumerError) -> bool {
        self.error_handler
            .handle_other_exception(&error, self.control.as_ref())
    }

    pub fn control(&self) -> &Arc<dyn ConsumerControl> {
        &self.control
    }
}

/// Records behind the high watermark once `offset` has been handled.
pub fn consumer_lag(high_watermark: i64, offset: i64) -> u64 {
    u64::try_from(high_watermark - offset - 1).unwrap_or(0)
}

/// A subscribed rdkafka stream consumer driving a [`ConsumerWorker`].
pub struct KafkaEventConsumer {
    name: String,
    consumer: Arc<LoggingConsumer>,
    worker: ConsumerWorker,
    metrics: Arc<KafkaMetrics>,
    stop: CancellationToken,
}

impl KafkaEventConsumer {
    /// Creates and subscribes the consumer. The returned handle is the
    /// partition resume task, which ends with `cancel`.
    pub fn new(
        name: impl Into<String>,
        config: &KafkaConfig,
        group_id: &str,
        topics: &[String],
        processor: Arc<dyn RecordProcessor>,
        error_handler: Arc<KafkaErrorHandler>,
        metrics: Arc<KafkaMetrics>,
        cancel: &CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), EventBusKafkaError> {
        let name = name.into();
        if !config.enabled {
            return Err(EventBusKafkaError::Disabled);
        }
        if topics.is_empty() {
            return Err(EventBusKafkaError::Configuration(format!(
                "consumer {} has no topics",
                name
            )));
        }

        let consumer: LoggingConsumer = config
            .consumer_client_config(group_id)
            .create_with_context(LoggingConsumerContext)?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;
        tracing::info!(
            "KafkaEventConsumer[{}]: subscribed to {} topics as group {}: {:?}",
            name,
            topics.len(),
            group_id,
            topics
        );

        let consumer = Arc::new(consumer);
        let stop = cancel.child_token();
        let control: Arc<dyn ConsumerControl> =
            Arc::new(KafkaConsumerControl::new(consumer.clone(), stop.clone()));
        let (resumes, resume_task) = ResumeScheduler::spawn(control.clone(), stop.clone());

        Ok((
            Self {
                name,
                consumer,
                worker: ConsumerWorker::new(processor, error_handler, control, resumes),
                metrics,
                stop,
            },
            resume_task,
        ))
    }

    /// Polls until cancelled or stopped by a fatal error. Records of one
    /// partition are handled strictly in order.
    pub async fn run(self) {
        tracing::info!("KafkaEventConsumer[{}]: starting poll loop", self.name);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                message = self.consumer.recv() => match message {
                    Ok(message) => {
                        let record = InboundRecord::from_message(&message);
                        drop(message);
                        if let Err(e) = self.worker.handle_record(&record).await {
                            tracing::error!(
                                "KafkaEventConsumer[{}]: failed to commit {} offset {}: {}",
                                self.name,
                                record.topic_partition(),
                                record.offset,
                                e
                            );
                        }
                        self.record_lag(&record);
                    }
                    Err(e) => {
                        if self.worker.handle_consumer_error(ConsumerError::Broker(e)) {
                            break;
                        }
                    }
                },
            }
        }
        tracing::info!("KafkaEventConsumer[{}]: poll loop stopped", self.name);
    }

    /// Uses the client's cached watermarks, so no broker round trip.
    fn record_lag(&self, record: &InboundRecord) {
        match self
            .consumer
            .get_watermark_offsets(&record.topic, record.partition)
        {
            Ok((_, high)) => self
                .metrics
                .set_consumer_lag(&record.topic, consumer_lag(high, record.offset)),
            Err(e) => tracing::debug!(
                "KafkaEventConsumer[{}]: no watermarks for {}: {}",
                self.name,
                record.topic_partition(),
                e
            ),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
