use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::infrastructure::kafka_metrics::{
    ConsumerMetricsSnapshot, ErrorMetricsSnapshot, ProducerMetricsSnapshot, TopicMetricsSnapshot,
};
use crate::infrastructure::kafka_monitoring::{
    ActiveTopics, CircuitBreakerReset, DeadLetterSummary, HealthState, KafkaHealth,
    MonitoringService, PerformanceSummary, SystemMetrics,
};
use crate::infrastructure::kafka_producer::ProducerStatus;
use crate::infrastructure::kafka_error_handler::RetryStatistics;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message }))
}

pub async fn kafka_health(State(service): State<Arc<MonitoringService>>) -> Json<KafkaHealth> {
    tracing::info!("Kafka health check requested");
    Json(service.health())
}

/// Cached health evaluation. 503 when DOWN.
pub async fn health_indicator(
    State(service): State<Arc<MonitoringService>>,
) -> impl IntoResponse {
    let indicator = service.health_indicator();
    let status = match indicator.status {
        HealthState::Up => StatusCode::OK,
        HealthState::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(indicator))
}

pub async fn all_metrics(State(service): State<Arc<MonitoringService>>) -> Json<SystemMetrics> {
    tracing::info!("Kafka metrics requested");
    Json(service.all_metrics())
}

pub async fn producer_metrics(
    State(service): State<Arc<MonitoringService>>,
) -> Json<ProducerMetricsSnapshot> {
    Json(service.producer_metrics())
}

pub async fn consumer_metrics(
    State(service): State<Arc<MonitoringService>>,
) -> Json<ConsumerMetricsSnapshot> {
    Json(service.consumer_metrics())
}

pub async fn error_metrics(
    State(service): State<Arc<MonitoringService>>,
) -> Json<ErrorMetricsSnapshot> {
    Json(service.error_metrics())
}

pub async fn all_topic_metrics(
    State(service): State<Arc<MonitoringService>>,
) -> Json<std::collections::BTreeMap<String, TopicMetricsSnapshot>> {
    Json(service.all_topic_metrics())
}

pub async fn topic_metrics(
    State(service): State<Arc<MonitoringService>>,
    Path(topic): Path<String>,
) -> Result<Json<TopicMetricsSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    tracing::info!("Topic metrics requested for: {}", topic);
    service
        .topic_metrics(&topic)
        .map(Json)
        .ok_or_else(|| not_found(format!("No metrics recorded for topic {}", topic)))
}

pub async fn producer_status(
    State(service): State<Arc<MonitoringService>>,
) -> Json<ProducerStatus> {
    Json(service.producer_status())
}

pub async fn reset_circuit_breaker(
    State(service): State<Arc<MonitoringService>>,
) -> Json<CircuitBreakerReset> {
    tracing::info!("Circuit breaker reset requested");
    Json(service.reset_circuit_breaker())
}

pub async fn active_topics(State(service): State<Arc<MonitoringService>>) -> Json<ActiveTopics> {
    Json(service.active_topics())
}

pub async fn performance_summary(
    State(service): State<Arc<MonitoringService>>,
) -> Json<PerformanceSummary> {
    Json(service.performance_summary())
}

pub async fn retry_statistics(
    State(service): State<Arc<MonitoringService>>,
) -> Json<RetryStatistics> {
    Json(service.retry_statistics())
}

pub async fn dead_letter_summary(
    State(service): State<Arc<MonitoringService>>,
) -> Result<Json<DeadLetterSummary>, (StatusCode, Json<ErrorResponse>)> {
    service
        .dead_letter_summary()
        .map(Json)
        .ok_or_else(|| not_found("Dead-letter observer is not running".to_string()))
}
