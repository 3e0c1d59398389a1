use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::infrastructure::kafka_monitoring::MonitoringService;
use crate::web::handlers::*;

/// Monitoring surface, mounted under `/api/kafka`.
pub fn create_router(service: Arc<MonitoringService>) -> Router {
    let kafka = Router::new()
        .route("/health", get(kafka_health))
        .route("/health/indicator", get(health_indicator))
        .route("/metrics", get(all_metrics))
        .route("/metrics/producer", get(producer_metrics))
        .route("/metrics/consumer", get(consumer_metrics))
        .route("/metrics/errors", get(error_metrics))
        .route("/metrics/topics", get(all_topic_metrics))
        .route("/metrics/topics/{topic}", get(topic_metrics))
        .route("/producer/status", get(producer_status))
        .route("/producer/reset-circuit-breaker", post(reset_circuit_breaker))
        .route("/topics/active", get(active_topics))
        .route("/performance/summary", get(performance_summary))
        .route("/retry/statistics", get(retry_statistics))
        .route("/dead-letters/summary", get(dead_letter_summary))
        .with_state(service);

    Router::new()
        .nest("/api/kafka", kafka)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
