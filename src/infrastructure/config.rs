use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::EnvelopeFactory;
use crate::infrastructure::kafka_abstraction::ErrorClass;
use crate::infrastructure::kafka_config::KafkaConfig;
use crate::infrastructure::logging::LoggingConfig;

/// Reads `key` from the environment, falling back to `default` when unset or unparsable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Config: ignoring unparsable value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

pub(crate) fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|raw| split_list(&raw))
}

/// Comma separated list, trimmed, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub circuit_breaker_threshold: u64,
    pub circuit_breaker_reset_ms: u64,
    pub producer_region: String,
    pub schema_version: String,
    pub envelope_ttl_seconds: u32,
    pub delivery_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 10,
            circuit_breaker_reset_ms: 5 * 60 * 1000,
            producer_region: "us-east".to_string(),
            schema_version: "v1".to_string(),
            envelope_ttl_seconds: 3600,
            delivery_timeout_ms: 5000,
        }
    }
}

impl ProducerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            circuit_breaker_threshold: env_or(
                "PRODUCER_CIRCUIT_BREAKER_THRESHOLD",
                d.circuit_breaker_threshold,
            ),
            circuit_breaker_reset_ms: env_or(
                "PRODUCER_CIRCUIT_BREAKER_RESET_MS",
                d.circuit_breaker_reset_ms,
            ),
            producer_region: env_or("PRODUCER_REGION", d.producer_region),
            schema_version: env_or("PRODUCER_SCHEMA_VERSION", d.schema_version),
            envelope_ttl_seconds: env_or("PRODUCER_ENVELOPE_TTL_SECONDS", d.envelope_ttl_seconds),
            delivery_timeout_ms: env_or("PRODUCER_DELIVERY_TIMEOUT_MS", d.delivery_timeout_ms),
        }
    }

    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    /// Region, schema version and ttl stamped on every outgoing envelope.
    pub fn envelope_factory(&self) -> EnvelopeFactory {
        EnvelopeFactory::new(
            self.producer_region.clone(),
            self.schema_version.clone(),
            self.envelope_ttl_seconds,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub non_retryable_exceptions: Vec<ErrorClass>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10000,
            non_retryable_exceptions: vec![
                ErrorClass::InvalidArgument,
                ErrorClass::NullReference,
                ErrorClass::UnsupportedOperation,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub suffix: String,
    pub enabled: bool,
    pub include_headers: bool,
    pub include_stack_trace: bool,
    pub max_message_size: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            suffix: "-dlt".to_string(),
            enabled: true,
            include_headers: true,
            include_stack_trace: false,
            max_message_size: 1_048_576, // 1MB
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMonitoringConfig {
    pub enabled: bool,
    pub log_retry_attempts: bool,
    pub log_dlt_messages: bool,
}

impl Default for ErrorMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_retry_attempts: true,
            log_dlt_messages: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    pub retry: RetryConfig,
    pub dlt: DeadLetterConfig,
    pub monitoring: ErrorMonitoringConfig,
    pub retry_retention_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ErrorHandlingConfig {
    pub fn new(retry: RetryConfig, dlt: DeadLetterConfig) -> Self {
        Self {
            retry,
            dlt,
            ..Self::with_defaults()
        }
    }

    pub fn with_defaults() -> Self {
        Self {
            retry: RetryConfig::default(),
            dlt: DeadLetterConfig::default(),
            monitoring: ErrorMonitoringConfig::default(),
            retry_retention_ms: 60 * 60 * 1000,
            sweep_interval_ms: 5 * 60 * 1000,
        }
    }

    pub fn from_env() -> Self {
        let d = Self::with_defaults();

        let non_retryable = match env_list("ERROR_HANDLING_NON_RETRYABLE") {
            Some(names) => names
                .iter()
                .filter_map(|name| match name.parse::<ErrorClass>() {
                    Ok(class) => Some(class),
                    Err(_) => {
                        tracing::warn!("Config: unknown error class in deny-list: {}", name);
                        None
                    }
                })
                .collect(),
            None => d.retry.non_retryable_exceptions.clone(),
        };

        Self {
            retry: RetryConfig {
                max_attempts: env_or("ERROR_HANDLING_RETRY_MAX_ATTEMPTS", d.retry.max_attempts),
                initial_delay_ms: env_or(
                    "ERROR_HANDLING_RETRY_INITIAL_DELAY_MS",
                    d.retry.initial_delay_ms,
                ),
                multiplier: env_or("ERROR_HANDLING_RETRY_MULTIPLIER", d.retry.multiplier),
                max_delay_ms: env_or("ERROR_HANDLING_RETRY_MAX_DELAY_MS", d.retry.max_delay_ms),
                non_retryable_exceptions: non_retryable,
            },
            dlt: DeadLetterConfig {
                suffix: env_or("ERROR_HANDLING_DLT_SUFFIX", d.dlt.suffix),
                enabled: env_or("ERROR_HANDLING_DLT_ENABLED", d.dlt.enabled),
                include_headers: env_or("ERROR_HANDLING_DLT_INCLUDE_HEADERS", d.dlt.include_headers),
                include_stack_trace: env_or(
                    "ERROR_HANDLING_DLT_INCLUDE_STACK_TRACE",
                    d.dlt.include_stack_trace,
                ),
                max_message_size: env_or(
                    "ERROR_HANDLING_DLT_MAX_MESSAGE_SIZE",
                    d.dlt.max_message_size,
                ),
            },
            monitoring: ErrorMonitoringConfig {
                enabled: env_or("ERROR_HANDLING_MONITORING_ENABLED", d.monitoring.enabled),
                log_retry_attempts: env_or(
                    "ERROR_HANDLING_LOG_RETRY_ATTEMPTS",
                    d.monitoring.log_retry_attempts,
                ),
                log_dlt_messages: env_or(
                    "ERROR_HANDLING_LOG_DLT_MESSAGES",
                    d.monitoring.log_dlt_messages,
                ),
            },
            retry_retention_ms: env_or("ERROR_HANDLING_RETRY_RETENTION_MS", d.retry_retention_ms),
            sweep_interval_ms: env_or("ERROR_HANDLING_SWEEP_INTERVAL_MS", d.sweep_interval_ms),
        }
    }

    pub fn retry_retention(&self) -> Duration {
        Duration::from_millis(self.retry_retention_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Entity names per wire format. Subscriptions are generated from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    pub avro: Vec<String>,
    pub json: Vec<String>,
    pub string: Vec<String>,
    /// Also subscribe to the dead-letter topics and log what lands there.
    pub observe_dead_letters: bool,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            avro: vec!["user".to_string(), "address".to_string()],
            json: vec!["user".to_string(), "address".to_string()],
            string: vec!["user".to_string(), "address".to_string()],
            observe_dead_letters: false,
        }
    }
}

impl TopicsConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            avro: env_list("KAFKA_TOPICS_CONSUMER_AVRO").unwrap_or(d.avro),
            json: env_list("KAFKA_TOPICS_CONSUMER_JSON").unwrap_or(d.json),
            string: env_list("KAFKA_TOPICS_CONSUMER_STRING").unwrap_or(d.string),
            observe_dead_letters: env_or("KAFKA_TOPICS_OBSERVE_DLT", d.observe_dead_letters),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub host: String,
    pub port: u16,
    pub active_topic_window_secs: u64,
    pub health_cache_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            active_topic_window_secs: 5 * 60,
            health_cache_secs: 60,
        }
    }
}

impl MonitoringConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: env_or("MONITORING_HOST", d.host),
            port: env_or("PORT", d.port),
            active_topic_window_secs: env_or(
                "MONITORING_ACTIVE_TOPIC_WINDOW_SECS",
                d.active_topic_window_secs,
            ),
            health_cache_secs: env_or("MONITORING_HEALTH_CACHE_SECS", d.health_cache_secs),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub kafka: KafkaConfig,
    pub producer: ProducerConfig,
    pub error_handling: ErrorHandlingConfig,
    pub topics: TopicsConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Loads `.env` (if present) and then the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            kafka: KafkaConfig::from_env(),
            producer: ProducerConfig::from_env(),
            error_handling: ErrorHandlingConfig::from_env(),
            topics: TopicsConfig::from_env(),
            monitoring: MonitoringConfig::from_env(),
            logging: LoggingConfig::from_env(),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_handling_defaults() {
        let config = ErrorHandlingConfig::with_defaults();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.retry.max_delay_ms, 10000);
        assert_eq!(config.retry.non_retryable_exceptions.len(), 3);
        assert_eq!(config.dlt.suffix, "-dlt");
        assert!(config.dlt.enabled);
        assert!(config.dlt.include_headers);
        assert!(!config.dlt.include_stack_trace);
        assert_eq!(config.dlt.max_message_size, 1048576);
        assert_eq!(config.retry_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn producer_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.circuit_breaker_threshold, 10);
        assert_eq!(config.circuit_breaker_reset(), Duration::from_secs(300));
        assert_eq!(config.producer_region, "us-east");
    }

    #[test]
    fn split_list_trims_and_drops_blanks() {
        assert_eq!(split_list(" user, ,address ,"), vec!["user", "address"]);
        assert!(split_list("").is_empty());
    }
}
