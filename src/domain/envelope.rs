use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::Operation;

pub const DEFAULT_PRODUCER_REGION: &str = "us-east";
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";
pub const DEFAULT_TTL_SECONDS: u32 = 3600;

/// The message on the wire, shared by every transport format.
///
/// `data` is the last field so that the binary encoding of an envelope can be
/// read back as [`EnvelopeMetadata`] without knowing the payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub event_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub source: String,
    pub topic: String,
    pub schema_version: String,
    pub trace_id: String,
    pub producer_region: String,
    pub retry_count: u32,
    /// Seconds. Advisory only.
    pub ttl: u32,
    pub timestamp: DateTime<Utc>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn operation(&self) -> Option<Operation> {
        Operation::parse(&self.event_type)
    }

    pub fn metadata(&self) -> EnvelopeMetadata {
        EnvelopeMetadata::from(self)
    }

    /// Swaps the payload, keeping identity and routing fields.
    pub fn map_data<U, F>(self, f: F) -> Envelope<U>
    where
        F: FnOnce(T) -> U,
    {
        Envelope {
            event_id: self.event_id,
            event_type: self.event_type,
            entity_type: self.entity_type,
            source: self.source,
            topic: self.topic,
            schema_version: self.schema_version,
            trace_id: self.trace_id,
            producer_region: self.producer_region,
            retry_count: self.retry_count,
            ttl: self.ttl,
            timestamp: self.timestamp,
            data: self.data.map(f),
        }
    }

    /// Fallible variant of [`Envelope::map_data`].
    pub fn try_map_data<U, E, F>(self, f: F) -> Result<Envelope<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        let data = match self.data {
            Some(value) => Some(f(value)?),
            None => None,
        };
        Ok(Envelope {
            event_id: self.event_id,
            event_type: self.event_type,
            entity_type: self.entity_type,
            source: self.source,
            topic: self.topic,
            schema_version: self.schema_version,
            trace_id: self.trace_id,
            producer_region: self.producer_region,
            retry_count: self.retry_count,
            ttl: self.ttl,
            timestamp: self.timestamp,
            data,
        })
    }
}

/// Envelope fields without the payload. Used for dead-letter diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub event_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub source: String,
    pub topic: String,
    pub schema_version: String,
    pub trace_id: String,
    pub producer_region: String,
    pub retry_count: u32,
    pub ttl: u32,
    pub timestamp: DateTime<Utc>,
}

impl EnvelopeMetadata {
    /// Copy after `deliveries` further delivery attempts. Only `retry_count` changes.
    pub fn redelivered(mut self, deliveries: u32) -> Self {
        self.retry_count = self.retry_count.saturating_add(deliveries);
        self
    }
}

impl<T> From<&Envelope<T>> for EnvelopeMetadata {
    fn from(envelope: &Envelope<T>) -> Self {
        Self {
            event_id: envelope.event_id,
            event_type: envelope.event_type.clone(),
            entity_type: envelope.entity_type.clone(),
            source: envelope.source.clone(),
            topic: envelope.topic.clone(),
            schema_version: envelope.schema_version.clone(),
            trace_id: envelope.trace_id.clone(),
            producer_region: envelope.producer_region.clone(),
            retry_count: envelope.retry_count,
            ttl: envelope.ttl,
            timestamp: envelope.timestamp,
        }
    }
}

/// Stamps identity and audit fields on new envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeFactory {
    pub producer_region: String,
    pub schema_version: String,
    pub ttl: u32,
}

impl Default for EnvelopeFactory {
    fn default() -> Self {
        Self {
            producer_region: DEFAULT_PRODUCER_REGION.to_string(),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            ttl: DEFAULT_TTL_SECONDS,
        }
    }
}

impl EnvelopeFactory {
    pub fn new(producer_region: impl Into<String>, schema_version: impl Into<String>, ttl: u32) -> Self {
        Self {
            producer_region: producer_region.into(),
            schema_version: schema_version.into(),
            ttl,
        }
    }

    /// Fresh `event_id` and `trace_id` on every call.
    pub fn create<T>(
        &self,
        data: T,
        operation: Operation,
        entity_type: &str,
        source: &str,
        topic: &str,
    ) -> Envelope<T> {
        Envelope {
            event_id: Uuid::new_v4(),
            event_type: operation.as_str().to_string(),
            entity_type: entity_type.to_lowercase(),
            source: source.to_string(),
            topic: topic.to_string(),
            schema_version: self.schema_version.clone(),
            trace_id: Uuid::new_v4().to_string(),
            producer_region: self.producer_region.clone(),
            retry_count: 0,
            ttl: self.ttl,
            timestamp: Utc::now(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_stamps_defaults() {
        let factory = EnvelopeFactory::default();
        let envelope = factory.create(42u32, Operation::Update, "User", "user-service", "user-update-json");

        assert_eq!(envelope.event_type, "update");
        assert_eq!(envelope.entity_type, "user");
        assert_eq!(envelope.producer_region, "us-east");
        assert_eq!(envelope.schema_version, "v1");
        assert_eq!(envelope.ttl, 3600);
        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.data, Some(42));
        assert_ne!(envelope.trace_id, envelope.event_id.to_string());
    }

    #[test]
    fn each_envelope_gets_new_ids() {
        let factory = EnvelopeFactory::default();
        let a = factory.create((), Operation::Create, "user", "s", "t");
        let b = factory.create((), Operation::Create, "user", "s", "t");
        assert_ne!(a.event_id, b.event_id);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn map_data_keeps_identity() {
        let envelope = EnvelopeFactory::default().create(2u32, Operation::Delete, "address", "s", "t");
        let event_id = envelope.event_id;
        let mapped = envelope.map_data(|v| v.to_string());
        assert_eq!(mapped.event_id, event_id);
        assert_eq!(mapped.data.as_deref(), Some("2"));
        assert_eq!(mapped.operation(), Some(Operation::Delete));
    }

    #[test]
    fn redelivery_only_bumps_retry_count() {
        let envelope = EnvelopeFactory::default().create((), Operation::Create, "user", "s", "t");
        let again = envelope.metadata().redelivered(2).redelivered(1);
        assert_eq!(again.retry_count, 3);
        assert_eq!(again.event_id, envelope.event_id);
        assert_eq!(again.trace_id, envelope.trace_id);
    }
}
