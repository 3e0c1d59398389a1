use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::kafka_abstraction::ErrorClass;

fn average(sum: u64, count: u64) -> f64 {
    if count > 0 {
        sum as f64 / count as f64
    } else {
        0.0
    }
}

#[derive(Debug, Default)]
pub struct TopicMetrics {
    producer_messages: AtomicU64,
    consumer_messages: AtomicU64,
    producer_bytes: AtomicU64,
    consumer_bytes: AtomicU64,
    producer_latency_sum: AtomicU64,
    producer_latency_count: AtomicU64,
    consumer_latency_sum: AtomicU64,
    consumer_latency_count: AtomicU64,
    errors: AtomicU64,
    consumer_lag: AtomicU64,
    message_count: AtomicU64,
    /// Epoch millis of the last message seen on the topic.
    last_message_time: AtomicI64,
}

impl TopicMetrics {
    fn record_producer_message(&self, size: u64, latency_ms: u64) {
        self.producer_messages.fetch_add(1, Ordering::Relaxed);
        self.producer_bytes.fetch_add(size, Ordering::Relaxed);
        self.producer_latency_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.producer_latency_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn record_consumer_message(&self, size: u64, latency_ms: u64) {
        self.consumer_messages.fetch_add(1, Ordering::Relaxed);
        self.consumer_bytes.fetch_add(size, Ordering::Relaxed);
        self.consumer_latency_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.consumer_latency_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.last_message_time
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TopicMetricsSnapshot {
        TopicMetricsSnapshot {
            producer_messages: self.producer_messages.load(Ordering::Relaxed),
            consumer_messages: self.consumer_messages.load(Ordering::Relaxed),
            producer_bytes: self.producer_bytes.load(Ordering::Relaxed),
            consumer_bytes: self.consumer_bytes.load(Ordering::Relaxed),
            producer_latency_ms: average(
                self.producer_latency_sum.load(Ordering::Relaxed),
                self.producer_latency_count.load(Ordering::Relaxed),
            ),
            consumer_latency_ms: average(
                self.consumer_latency_sum.load(Ordering::Relaxed),
                self.consumer_latency_count.load(Ordering::Relaxed),
            ),
            errors: self.errors.load(Ordering::Relaxed),
            consumer_lag: self.consumer_lag.load(Ordering::Relaxed),
            last_message_time: self.last_message_time.load(Ordering::Relaxed),
            message_count: self.message_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMetricsSnapshot {
    pub producer_messages: u64,
    pub consumer_messages: u64,
    pub producer_bytes: u64,
    pub consumer_bytes: u64,
    pub producer_latency_ms: f64,
    pub consumer_latency_ms: f64,
    pub errors: u64,
    pub consumer_lag: u64,
    pub last_message_time: i64,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerMetricsSnapshot {
    pub total_messages: u64,
    pub total_bytes: u64,
    pub average_latency_ms: f64,
    pub active_connections: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerMetricsSnapshot {
    pub total_messages: u64,
    pub total_bytes: u64,
    pub average_latency_ms: f64,
    pub active_connections: u64,
    pub consumer_lag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetricsSnapshot {
    pub total_errors: u64,
    pub deserialization_errors: u64,
    pub network_errors: u64,
    pub timeout_errors: u64,
    pub error_rate_percent: f64,
}

/// Global and per-topic message counters. Derived values are computed on read.
#[derive(Debug, Default)]
pub struct KafkaMetrics {
    // Producer metrics
    producer_messages: AtomicU64,
    producer_bytes: AtomicU64,
    producer_latency_sum: AtomicU64,
    producer_latency_count: AtomicU64,
    active_producer_connections: AtomicU64,

    // Consumer metrics
    consumer_messages: AtomicU64,
    consumer_bytes: AtomicU64,
    consumer_latency_sum: AtomicU64,
    consumer_latency_count: AtomicU64,
    active_consumer_connections: AtomicU64,
    consumer_lag: AtomicU64,

    // Error metrics
    total_errors: AtomicU64,
    deserialization_errors: AtomicU64,
    network_errors: AtomicU64,
    timeout_errors: AtomicU64,

    topics: DashMap<String, Arc<TopicMetrics>>,
}

impl KafkaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> Arc<TopicMetrics> {
        if let Some(existing) = self.topics.get(topic) {
            return existing.clone();
        }
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicMetrics::default()))
            .clone()
    }

    pub fn record_producer_message(&self, topic: &str, key: &str, size: usize, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        self.producer_messages.fetch_add(1, Ordering::Relaxed);
        self.producer_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.producer_latency_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.producer_latency_count.fetch_add(1, Ordering::Relaxed);
        self.topic(topic).record_producer_message(size as u64, latency_ms);

        tracing::debug!(topic, key, size, latency_ms, "Recorded producer message");
    }

    pub fn record_consumer_message(&self, topic: &str, key: &str, size: usize, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        self.consumer_messages.fetch_add(1, Ordering::Relaxed);
        self.consumer_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.consumer_latency_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.consumer_latency_count.fetch_add(1, Ordering::Relaxed);
        self.topic(topic).record_consumer_message(size as u64, latency_ms);

        tracing::debug!(topic, key, size, latency_ms, "Recorded consumer message");
    }

    pub fn record_error(&self, topic: &str, class: ErrorClass, message: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.topic(topic).errors.fetch_add(1, Ordering::Relaxed);

        match class {
            ErrorClass::Deserialization => {
                self.deserialization_errors.fetch_add(1, Ordering::Relaxed);
            }
            ErrorClass::Broker => {
                self.network_errors.fetch_add(1, Ordering::Relaxed);
            }
            ErrorClass::Timeout => {
                self.timeout_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        tracing::warn!(topic, error_class = %class, "Recorded error: {}", message);
    }

    /// Last value wins, globally and for the topic.
    pub fn set_consumer_lag(&self, topic: &str, lag: u64) {
        self.consumer_lag.store(lag, Ordering::Relaxed);
        self.topic(topic).consumer_lag.store(lag, Ordering::Relaxed);
    }

    pub fn set_active_producer_connections(&self, count: u64) {
        self.active_producer_connections
            .store(count, Ordering::Relaxed);
    }

    pub fn set_active_consumer_connections(&self, count: u64) {
        self.active_consumer_connections
            .store(count, Ordering::Relaxed);
    }

    pub fn producer_metrics(&self) -> ProducerMetricsSnapshot {
        ProducerMetricsSnapshot {
            total_messages: self.producer_messages.load(Ordering::Relaxed),
            total_bytes: self.producer_bytes.load(Ordering::Relaxed),
            average_latency_ms: average(
                self.producer_latency_sum.load(Ordering::Relaxed),
                self.producer_latency_count.load(Ordering::Relaxed),
            ),
            active_connections: self.active_producer_connections.load(Ordering::Relaxed),
        }
    }

    pub fn consumer_metrics(&self) -> ConsumerMetricsSnapshot {
        ConsumerMetricsSnapshot {
            total_messages: self.consumer_messages.load(Ordering::Relaxed),
            total_bytes: self.consumer_bytes.load(Ordering::Relaxed),
            average_latency_ms: average(
                self.consumer_latency_sum.load(Ordering::Relaxed),
                self.consumer_latency_count.load(Ordering::Relaxed),
            ),
            active_connections: self.active_consumer_connections.load(Ordering::Relaxed),
            consumer_lag: self.consumer_lag.load(Ordering::Relaxed),
        }
    }

    pub fn error_metrics(&self) -> ErrorMetricsSnapshot {
        ErrorMetricsSnapshot {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            deserialization_errors: self.deserialization_errors.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            error_rate_percent: self.error_rate(),
        }
    }

    /// errors / (producer + consumer messages) * 100
    pub fn error_rate(&self) -> f64 {
        let messages = self.producer_messages.load(Ordering::Relaxed)
            + self.consumer_messages.load(Ordering::Relaxed);
        if messages > 0 {
            self.total_errors.load(Ordering::Relaxed) as f64 / messages as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<TopicMetricsSnapshot> {
        self.topics.get(topic).map(|m| m.snapshot())
    }

    pub fn all_topic_metrics(&self) -> BTreeMap<String, TopicMetricsSnapshot> {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Topics with a message newer than `window`.
    pub fn active_topics(&self, window: Duration) -> BTreeMap<String, TopicMetricsSnapshot> {
        let now = Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        self.all_topic_metrics()
            .into_iter()
            .filter(|(_, m)| m.last_message_time > 0 && now - m.last_message_time < window_ms)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_percent_of_all_messages() {
        let metrics = KafkaMetrics::new();
        for _ in 0..60 {
            metrics.record_producer_message("user-create-avro", "1", 10, Duration::from_millis(2));
        }
        for _ in 0..40 {
            metrics.record_consumer_message("user-create-avro", "1", 10, Duration::from_millis(4));
        }
        for _ in 0..5 {
            metrics.record_error("user-create-avro", ErrorClass::Processing, "boom");
        }
        assert_eq!(metrics.error_metrics().error_rate_percent, 5.0);
    }

    #[test]
    fn error_rate_without_traffic_is_zero() {
        let metrics = KafkaMetrics::new();
        metrics.record_error("t", ErrorClass::Timeout, "slow");
        assert_eq!(metrics.error_rate(), 0.0);
        assert_eq!(metrics.error_metrics().timeout_errors, 1);
    }

    #[test]
    fn averages_and_topic_counters() {
        let metrics = KafkaMetrics::new();
        metrics.record_producer_message("a", "k", 100, Duration::from_millis(10));
        metrics.record_producer_message("a", "k", 50, Duration::from_millis(30));
        metrics.record_consumer_message("b", "k", 7, Duration::from_millis(1));
        metrics.record_error("b", ErrorClass::Deserialization, "bad bytes");

        let producer = metrics.producer_metrics();
        assert_eq!(producer.total_messages, 2);
        assert_eq!(producer.total_bytes, 150);
        assert_eq!(producer.average_latency_ms, 20.0);

        let a = metrics.topic_metrics("a").unwrap();
        assert_eq!(a.producer_messages, 2);
        assert_eq!(a.message_count, 2);
        assert!(a.last_message_time > 0);

        let b = metrics.topic_metrics("b").unwrap();
        assert_eq!(b.errors, 1);
        assert_eq!(metrics.error_metrics().deserialization_errors, 1);
        assert!(metrics.topic_metrics("missing").is_none());
    }

    #[test]
    fn lag_is_a_gauge() {
        let metrics = KafkaMetrics::new();
        metrics.set_consumer_lag("a", 10);
        metrics.set_consumer_lag("a", 3);
        assert_eq!(metrics.consumer_metrics().consumer_lag, 3);
        assert_eq!(metrics.topic_metrics("a").unwrap().consumer_lag, 3);
    }

    #[test]
    fn active_topics_filters_by_window() {
        let metrics = KafkaMetrics::new();
        metrics.record_producer_message("hot", "k", 1, Duration::ZERO);
        metrics.set_consumer_lag("cold", 1);

        let active = metrics.active_topics(Duration::from_secs(300));
        assert!(active.contains_key("hot"));
        assert!(!active.contains_key("cold"));
        assert!(metrics.active_topics(Duration::ZERO).is_empty());
    }
}
