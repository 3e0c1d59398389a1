use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::infrastructure::config::env_or;

/// Resolved broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub enabled: bool,
    pub bootstrap_servers: String,
    pub group_id: String,
    pub client_id: String,
    pub producer_acks: String,
    pub producer_retries: i32,
    pub message_timeout_ms: i32,
    pub request_timeout_ms: i32,
    pub consumer_session_timeout_ms: i32,
    pub consumer_max_poll_interval_ms: i32,
    pub auto_offset_reset: String,
    pub security_protocol: String,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "event-relay-group".to_string(),
            client_id: "event-relay".to_string(),
            producer_acks: "all".to_string(),
            producer_retries: 3,
            message_timeout_ms: 30000,
            request_timeout_ms: 30000,
            consumer_session_timeout_ms: 10000, // broker minimum
            consumer_max_poll_interval_ms: 300000,
            auto_offset_reset: "earliest".to_string(),
            security_protocol: "PLAINTEXT".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl KafkaConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_or("KAFKA_ENABLED", d.enabled),
            bootstrap_servers: env_or("KAFKA_BOOTSTRAP_SERVERS", d.bootstrap_servers),
            group_id: env_or("KAFKA_GROUP_ID", d.group_id),
            client_id: env_or("KAFKA_CLIENT_ID", d.client_id),
            producer_acks: env_or("KAFKA_PRODUCER_ACKS", d.producer_acks),
            producer_retries: env_or("KAFKA_PRODUCER_RETRIES", d.producer_retries),
            message_timeout_ms: env_or("KAFKA_MESSAGE_TIMEOUT_MS", d.message_timeout_ms),
            request_timeout_ms: env_or("KAFKA_REQUEST_TIMEOUT_MS", d.request_timeout_ms),
            consumer_session_timeout_ms: env_or(
                "KAFKA_CONSUMER_SESSION_TIMEOUT_MS",
                d.consumer_session_timeout_ms,
            ),
            consumer_max_poll_interval_ms: env_or(
                "KAFKA_CONSUMER_MAX_POLL_INTERVAL_MS",
                d.consumer_max_poll_interval_ms,
            ),
            auto_offset_reset: env_or("KAFKA_AUTO_OFFSET_RESET", d.auto_offset_reset),
            security_protocol: env_or("KAFKA_SECURITY_PROTOCOL", d.security_protocol),
            sasl_mechanism: std::env::var("KAFKA_SASL_MECHANISM").ok(),
            sasl_username: std::env::var("KAFKA_SASL_USERNAME").ok(),
            sasl_password: std::env::var("KAFKA_SASL_PASSWORD").ok(),
        }
    }

    fn base_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("security.protocol", &self.security_protocol)
            .set("request.timeout.ms", self.request_timeout_ms.to_string());

        if let Some(mechanism) = &self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(password) = &self.sasl_password {
            config.set("sasl.password", password);
        }
        config
    }

    /// Delivery and request timeouts live here rather than in the producer.
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut config = self.base_client_config();
        config
            .set("acks", &self.producer_acks)
            .set("retries", self.producer_retries.to_string())
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        config
    }

    /// Manual commits only. Offsets are committed after a record is handled.
    pub fn consumer_client_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.base_client_config();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.consumer_session_timeout_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                self.consumer_max_poll_interval_ms.to_string(),
            );
        config
    }
}
