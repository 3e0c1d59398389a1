use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::infrastructure::config::MonitoringConfig;
use crate::infrastructure::kafka_dlq::DeadLetterObserver;
use crate::infrastructure::kafka_error_handler::{KafkaErrorHandler, RetryStatistics};
use crate::infrastructure::kafka_metrics::{
    ConsumerMetricsSnapshot, ErrorMetricsSnapshot, KafkaMetrics, ProducerMetricsSnapshot,
    TopicMetricsSnapshot,
};
use crate::infrastructure::kafka_producer::{EventProducer, ProducerStatus};

/// Below this producer success rate, with enough traffic, health is DOWN.
const MIN_HEALTHY_SUCCESS_RATE: f64 = 50.0;
const MIN_MESSAGES_FOR_SUCCESS_RATE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaHealth {
    pub status: HealthState,
    pub timestamp: i64,
    pub producer_metrics: ProducerMetricsSnapshot,
    pub consumer_metrics: ConsumerMetricsSnapshot,
    pub error_metrics: ErrorMetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub producer_metrics: ProducerMetricsSnapshot,
    pub consumer_metrics: ConsumerMetricsSnapshot,
    pub error_metrics: ErrorMetricsSnapshot,
    pub topic_metrics: BTreeMap<String, TopicMetricsSnapshot>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTopics {
    pub active_topics: BTreeMap<String, TopicMetricsSnapshot>,
    pub total_active_topics: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerReset {
    pub message: String,
    pub previous_status: ProducerStatus,
    pub current_status: ProducerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerPerformance {
    pub messages_per_second: f64,
    pub average_latency_ms: f64,
    pub success_rate_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerPerformance {
    pub messages_per_second: f64,
    pub average_latency_ms: f64,
    pub consumer_lag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthSummary {
    pub error_rate_percent: f64,
    pub total_errors: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub producer_performance: ProducerPerformance,
    pub consumer_performance: ConsumerPerformance,
    pub system_health: SystemHealthSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicator {
    pub status: HealthState,
    pub checked_at: i64,
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterSummary {
    pub by_error_class: BTreeMap<String, u64>,
    pub undecodable: u64,
}

/// Read side of the relay: metrics, producer state and retry tracking,
/// shaped for the HTTP monitoring surface.
pub struct MonitoringService {
    producer: EventProducer,
    metrics: Arc<KafkaMetrics>,
    error_handler: Arc<KafkaErrorHandler>,
    dead_letters: Option<Arc<DeadLetterObserver>>,
    config: MonitoringConfig,
    started: Instant,
    cached_health: Mutex<Option<(Instant, HealthIndicator)>>,
}

impl MonitoringService {
    pub fn new(
        producer: EventProducer,
        metrics: Arc<KafkaMetrics>,
        error_handler: Arc<KafkaErrorHandler>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            producer,
            metrics,
            error_handler,
            dead_letters: None,
            config,
            started: Instant::now(),
            cached_health: Mutex::new(None),
        }
    }

    pub fn with_dead_letter_observer(mut self, observer: Arc<DeadLetterObserver>) -> Self {
        self.dead_letters = Some(observer);
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn health(&self) -> KafkaHealth {
        KafkaHealth {
            status: HealthState::Up,
            timestamp: Utc::now().timestamp_millis(),
            producer_metrics: self.metrics.producer_metrics(),
            consumer_metrics: self.metrics.consumer_metrics(),
            error_metrics: self.metrics.error_metrics(),
        }
    }

    pub fn all_metrics(&self) -> SystemMetrics {
        SystemMetrics {
            producer_metrics: self.metrics.producer_metrics(),
            consumer_metrics: self.metrics.consumer_metrics(),
            error_metrics: self.metrics.error_metrics(),
            topic_metrics: self.metrics.all_topic_metrics(),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn producer_metrics(&self) -> ProducerMetricsSnapshot {
        self.metrics.producer_metrics()
    }

    pub fn consumer_metrics(&self) -> ConsumerMetricsSnapshot {
        self.metrics.consumer_metrics()
    }

    pub fn error_metrics(&self) -> ErrorMetricsSnapshot {
        self.metrics.error_metrics()
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<TopicMetricsSnapshot> {
        self.metrics.topic_metrics(topic)
    }

    pub fn all_topic_metrics(&self) -> BTreeMap<String, TopicMetricsSnapshot> {
        self.metrics.all_topic_metrics()
    }

    pub fn producer_status(&self) -> ProducerStatus {
        self.producer.status()
    }

    /// Zeroes the breaker's failure count and reports the status on both
    /// sides of the reset.
    pub fn reset_circuit_breaker(&self) -> CircuitBreakerReset {
        let previous_status = self.producer.status();
        self.producer.reset_circuit_breaker();
        if let Ok(mut cached) = self.cached_health.lock() {
            *cached = None;
        }
        CircuitBreakerReset {
            message: "Circuit breaker reset".to_string(),
            previous_status,
            current_status: self.producer.status(),
        }
    }

    pub fn active_topics(&self) -> ActiveTopics {
        let window = Duration::from_secs(self.config.active_topic_window_secs);
        let active_topics = self.metrics.active_topics(window);
        ActiveTopics {
            total_active_topics: active_topics.len(),
            active_topics,
        }
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let producer = self.metrics.producer_metrics();
        let consumer = self.metrics.consumer_metrics();
        let errors = self.metrics.error_metrics();
        let uptime = self.uptime_seconds();

        PerformanceSummary {
            producer_performance: ProducerPerformance {
                messages_per_second: per_second(producer.total_messages, self.started.elapsed()),
                average_latency_ms: producer.average_latency_ms,
                success_rate_percent: self.producer.stats().success_rate(),
            },
            consumer_performance: ConsumerPerformance {
                messages_per_second: per_second(consumer.total_messages, self.started.elapsed()),
                average_latency_ms: consumer.average_latency_ms,
                consumer_lag: consumer.consumer_lag,
            },
            system_health: SystemHealthSummary {
                error_rate_percent: errors.error_rate_percent,
                total_errors: errors.total_errors,
                uptime_seconds: uptime,
            },
        }
    }

    pub fn retry_statistics(&self) -> RetryStatistics {
        self.error_handler.retry_statistics()
    }

    pub fn dead_letter_summary(&self) -> Option<DeadLetterSummary> {
        self.dead_letters.as_ref().map(|observer| DeadLetterSummary {
            by_error_class: observer.counts_by_class(),
            undecodable: observer.undecodable(),
        })
    }

    /// Evaluated at most once per cache window.
    pub fn health_indicator(&self) -> HealthIndicator {
        let ttl = Duration::from_secs(self.config.health_cache_secs);
        if let Ok(cached) = self.cached_health.lock() {
            if let Some((at, indicator)) = cached.as_ref() {
                if at.elapsed() < ttl {
                    return indicator.clone();
                }
            }
        }

        let indicator = self.evaluate_health();
        if let Ok(mut cached) = self.cached_health.lock() {
            *cached = Some((Instant::now(), indicator.clone()));
        }
        indicator
    }

    fn evaluate_health(&self) -> HealthIndicator {
        let status = self.producer.status();
        let low_success = status.total_messages_sent >= MIN_MESSAGES_FOR_SUCCESS_RATE
            && status.success_rate_percent < MIN_HEALTHY_SUCCESS_RATE;
        let state = if status.circuit_breaker_open || low_success {
            HealthState::Down
        } else {
            HealthState::Up
        };
        if state == HealthState::Down {
            tracing::warn!(
                "Kafka health is DOWN: circuit_breaker_open={}, success_rate={:.2}%",
                status.circuit_breaker_open,
                status.success_rate_percent
            );
        }

        let mut details = BTreeMap::new();
        details.insert("metrics.total_messages".into(), status.total_messages_sent.into());
        details.insert(
            "metrics.successful_messages".into(),
            status.successful_messages.into(),
        );
        details.insert("metrics.failed_messages".into(), status.failed_messages.into());
        details.insert(
            "metrics.success_rate_percent".into(),
            format!("{:.2}", status.success_rate_percent).into(),
        );
        details.insert(
            "circuit_breaker.open".into(),
            status.circuit_breaker_open.into(),
        );
        details.insert(
            "circuit_breaker.failures".into(),
            status.circuit_breaker_failures.into(),
        );
        details.insert(
            "retry.active_entries".into(),
            self.error_handler.retry_statistics().active_retry_attempts.into(),
        );

        HealthIndicator {
            status: state,
            checked_at: Utc::now().timestamp_millis(),
            details,
        }
    }
}

fn per_second(total: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        total as f64 / seconds
    } else {
        0.0
    }
}
