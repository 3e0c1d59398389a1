use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use event_relay::application::{
    AddressEventHandler, ConsumerDispatcher, HandlerRegistry, UserEventHandler,
};
use event_relay::domain::EventFormat;
use event_relay::infrastructure::kafka_abstraction::KafkaProducerTrait;
use event_relay::infrastructure::logging::init_logging;
use event_relay::infrastructure::{
    AppConfig, DeadLetterObserver, EventProducer, InMemoryLedger, KafkaErrorHandler,
    KafkaEventConsumer, KafkaMetrics, KafkaProducer, MonitoringService, PostgresLedger,
    ProcessedMessageLedger, RecordProcessor, TopicsProvider,
};
use event_relay::web::create_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting event relay");

    let cancel = CancellationToken::new();
    let metrics = Arc::new(KafkaMetrics::new());

    let transport: Arc<dyn KafkaProducerTrait> = Arc::new(KafkaProducer::new(
        &config.kafka,
        Duration::from_millis(config.producer.delivery_timeout_ms),
    )?);
    let producer = EventProducer::new(transport.clone(), &config.producer, metrics.clone());
    metrics.set_active_producer_connections(u64::from(config.kafka.enabled));
    let envelopes = producer.envelope_factory();
    info!(
        "Envelopes stamped with region={}, schema_version={}, ttl={}s",
        envelopes.producer_region, envelopes.schema_version, envelopes.ttl
    );

    let ledger: Arc<dyn ProcessedMessageLedger> = match &config.database_url {
        Some(url) => {
            info!("Using Postgres processed-message ledger");
            Arc::new(PostgresLedger::connect(url).await?)
        }
        None => {
            warn!("DATABASE_URL not set, processed-message ledger is in memory");
            Arc::new(InMemoryLedger::new())
        }
    };

    let mut registry = HandlerRegistry::new();
    registry.register_handler(UserEventHandler)?;
    registry.register_handler(AddressEventHandler)?;
    let registry = Arc::new(registry);

    let dispatcher: Arc<dyn RecordProcessor> = Arc::new(ConsumerDispatcher::new(
        registry.clone(),
        ledger,
        metrics.clone(),
    ));
    let error_handler = Arc::new(KafkaErrorHandler::new(
        config.error_handling.clone(),
        transport,
        metrics.clone(),
        config.kafka.group_id.clone(),
    ));
    let sweeper = error_handler.clone().spawn_retry_sweeper(cancel.clone());

    let mut tasks = vec![sweeper];
    let topics = TopicsProvider::new(config.topics.clone());
    let mut dead_letter_observer = None;

    if config.kafka.enabled {
        let mut consumers = 0;
        for format in [EventFormat::Avro, EventFormat::Json, EventFormat::String] {
            let subscriptions = topics.topics_for(format);
            if subscriptions.is_empty() {
                continue;
            }
            let group_id = format!("{}-{}", config.kafka.group_id, format.suffix());
            let (consumer, resume_task) = KafkaEventConsumer::new(
                format!("{}", format),
                &config.kafka,
                &group_id,
                &subscriptions,
                dispatcher.clone(),
                error_handler.clone(),
                metrics.clone(),
                &cancel,
            )?;
            tasks.push(resume_task);
            tasks.push(consumer.spawn());
            consumers += 1;
        }

        if topics.observe_dead_letters() {
            let observer = Arc::new(DeadLetterObserver::new());
            let group_id = format!("{}-dlt", config.kafka.group_id);
            let (consumer, resume_task) = KafkaEventConsumer::new(
                "DLT",
                &config.kafka,
                &group_id,
                &topics.dead_letter_topics(&config.error_handling.dlt.suffix),
                observer.clone(),
                error_handler.clone(),
                metrics.clone(),
                &cancel,
            )?;
            tasks.push(resume_task);
            tasks.push(consumer.spawn());
            dead_letter_observer = Some(observer);
            consumers += 1;
        }
        metrics.set_active_consumer_connections(consumers);
    } else {
        warn!("Kafka disabled, no consumers started");
    }

    let mut monitoring = MonitoringService::new(
        producer,
        metrics,
        error_handler,
        config.monitoring.clone(),
    );
    if let Some(observer) = dead_letter_observer {
        monitoring = monitoring.with_dead_letter_observer(observer);
    }
    let app = create_router(Arc::new(monitoring));

    let address = config.monitoring.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!(
        "Monitoring API listening on {} with handlers for {:?}",
        address,
        registry.entity_types()
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    cancel.cancel();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Background task ended abnormally: {}", e);
        }
    }
    info!("Event relay stopped");
    Ok(())
}
