use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use event_relay::domain::EventFormat;
use event_relay::infrastructure::config::{ErrorHandlingConfig, MonitoringConfig, ProducerConfig};
use event_relay::infrastructure::kafka_abstraction::{ErrorClass, OutboundMessage};
use event_relay::infrastructure::kafka_in_memory::InMemoryKafkaProducer;
use event_relay::infrastructure::{
    DeadLetterObserver, EventProducer, KafkaErrorHandler, KafkaMetrics, MonitoringService,
};
use event_relay::web::create_router;

struct TestApp {
    router: Router,
    broker: Arc<InMemoryKafkaProducer>,
    producer: EventProducer,
    metrics: Arc<KafkaMetrics>,
}

fn app_with(observer: Option<Arc<DeadLetterObserver>>) -> TestApp {
    let broker = Arc::new(InMemoryKafkaProducer::new());
    let metrics = Arc::new(KafkaMetrics::new());
    let config = ProducerConfig {
        circuit_breaker_threshold: 3,
        ..ProducerConfig::default()
    };
    let producer = EventProducer::new(broker.clone(), &config, metrics.clone());
    let error_handler = Arc::new(KafkaErrorHandler::new(
        ErrorHandlingConfig::default(),
        broker.clone(),
        metrics.clone(),
        "event-relay-group",
    ));
    let mut service = MonitoringService::new(
        producer.clone(),
        metrics.clone(),
        error_handler,
        MonitoringConfig::default(),
    );
    if let Some(observer) = observer {
        service = service.with_dead_letter_observer(observer);
    }
    TestApp {
        router: create_router(Arc::new(service)),
        broker,
        producer,
        metrics,
    }
}

fn app() -> TestApp {
    app_with(None)
}

async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    call(router, Method::GET, uri).await
}

async fn send(producer: &EventProducer, topic: &str, times: usize) {
    for _ in 0..times {
        producer
            .send(OutboundMessage::new(topic, Some("k".into()), vec![0; 16]), EventFormat::Avro)
            .delivery()
            .await;
    }
}

#[tokio::test]
async fn health_is_up_with_empty_metrics() {
    let app = app();

    let (status, body) = get(&app.router, "/api/kafka/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert_eq!(body["producer_metrics"]["total_messages"], 0);
    assert_eq!(body["error_metrics"]["error_rate_percent"], 0.0);
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn error_rate_reflects_recorded_traffic() {
    let app = app();
    for _ in 0..60 {
        app.metrics
            .record_producer_message("user-create-avro", "1", 10, Duration::from_millis(1));
    }
    for _ in 0..40 {
        app.metrics
            .record_consumer_message("user-create-avro", "1", 10, Duration::from_millis(1));
    }
    for _ in 0..5 {
        app.metrics
            .record_error("user-create-avro", ErrorClass::Processing, "boom");
    }

    let (_, body) = get(&app.router, "/api/kafka/metrics/errors").await;
    assert_eq!(body["total_errors"], 5);
    assert_eq!(body["error_rate_percent"], 5.0);

    let (_, body) = get(&app.router, "/api/kafka/metrics").await;
    assert_eq!(body["topic_metrics"]["user-create-avro"]["errors"], 5);
    assert_eq!(body["consumer_metrics"]["total_messages"], 40);
}

#[tokio::test]
async fn topic_metrics_are_404_for_unknown_topic() {
    let app = app();
    send(&app.producer, "user-create-avro", 2).await;

    let (status, body) = get(&app.router, "/api/kafka/metrics/topics/user-create-avro").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["producer_messages"], 2);
    assert_eq!(body["producer_bytes"], 32);

    let (status, body) = get(&app.router, "/api/kafka/metrics/topics/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let (_, body) = get(&app.router, "/api/kafka/topics/active").await;
    assert_eq!(body["total_active_topics"], 1);
}

#[tokio::test]
async fn circuit_breaker_opens_and_resets_over_http() {
    let app = app();
    app.broker.fail_sends(true);
    send(&app.producer, "user-update-json", 3).await;

    let (_, status) = get(&app.router, "/api/kafka/producer/status").await;
    assert_eq!(status["circuit_breaker_open"], true);
    assert_eq!(status["failed_messages"], 3);

    let (code, indicator) = get(&app.router, "/api/kafka/health/indicator").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(indicator["status"], "DOWN");
    assert_eq!(indicator["details"]["circuit_breaker.open"], true);

    let (code, _) = get(&app.router, "/api/kafka/producer/reset-circuit-breaker").await;
    assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);

    let (code, reset) = call(
        &app.router,
        Method::POST,
        "/api/kafka/producer/reset-circuit-breaker",
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(reset["previous_status"]["circuit_breaker_open"], true);
    assert_eq!(reset["current_status"]["circuit_breaker_open"], false);
    assert_eq!(reset["current_status"]["circuit_breaker_failures"], 0);

    let (code, indicator) = get(&app.router, "/api/kafka/health/indicator").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(indicator["status"], "UP");
}

#[tokio::test]
async fn retry_statistics_report_configuration() {
    let app = app();

    let (status, body) = get(&app.router, "/api/kafka/retry/statistics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_retry_attempts"], 0);
    assert_eq!(body["max_retry_attempts"], 3);
    assert_eq!(body["retry_delay_ms"], 1000);
}

#[tokio::test]
async fn performance_summary_has_all_sections() {
    let app = app();
    send(&app.producer, "address-create-string", 4).await;

    let (status, body) = get(&app.router, "/api/kafka/performance/summary").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["producer_performance"]["success_rate_percent"], 100.0);
    assert!(body["consumer_performance"]["consumer_lag"].is_u64());
    assert_eq!(body["system_health"]["total_errors"], 0);
}

#[tokio::test]
async fn dead_letter_summary_requires_observer() {
    let app = app();
    let (status, _) = get(&app.router, "/api/kafka/dead-letters/summary").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let app = app_with(Some(Arc::new(DeadLetterObserver::new())));
    let (status, body) = get(&app.router, "/api/kafka/dead-letters/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["undecodable"], 0);
    assert!(body["by_error_class"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = app();
    let (status, _) = get(&app.router, "/api/kafka/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
