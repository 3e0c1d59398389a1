use serde::Serialize;
use uuid::Uuid;

use crate::domain::{EnvelopeFactory, EventFormat, Operation};
use crate::infrastructure::codec::CodecError;
use crate::infrastructure::kafka_producer::{EventProducer, SendHandle};
use crate::infrastructure::topics::topic_name;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("could not encode {entity_type} event: {source}")]
    Encode {
        entity_type: &'static str,
        #[source]
        source: CodecError,
    },
}

/// Wire mapping for one entity type.
///
/// The binary format carries [`EntityPublisher::Record`]. The JSON formats
/// carry the entity as it is.
pub trait EntityPublisher: Send + Sync + 'static {
    const ENTITY_TYPE: &'static str;

    type Entity: Serialize + Send + Sync;
    type Record: Serialize;

    /// Partition key. Stable once the entity has been persisted.
    fn extract_key(&self, entity: &Self::Entity) -> Option<String>;

    fn to_wire(&self, entity: &Self::Entity) -> Self::Record;

    fn event_source(&self) -> &str;
}

/// A queued publish. Delivery is reported through `delivery`.
#[derive(Debug)]
pub struct Published {
    pub event_id: Uuid,
    pub topic: String,
    pub key: Option<String>,
    pub delivery: SendHandle,
}

pub struct EventPublisher<P: EntityPublisher> {
    publisher: P,
    producer: EventProducer,
    factory: EnvelopeFactory,
}

impl<P: EntityPublisher> EventPublisher<P> {
    /// Envelopes are stamped with the producer's configured settings.
    pub fn new(publisher: P, producer: EventProducer) -> Self {
        Self {
            publisher,
            factory: producer.envelope_factory().clone(),
            producer,
        }
    }

    pub fn topic(&self, operation: Operation, format: EventFormat) -> String {
        topic_name(P::ENTITY_TYPE, operation, format)
    }

    /// Wraps `entity` in a fresh envelope and hands it to the producer.
    /// Does not wait for the broker.
    pub fn publish(
        &self,
        entity: &P::Entity,
        operation: Operation,
        format: EventFormat,
    ) -> Result<Published, PublishError> {
        let key = self.publisher.extract_key(entity);
        let topic = self.topic(operation, format);
        let source = self.publisher.event_source();
        tracing::info!(
            "EventPublisher: publishing to topic {} with event type {} and format {}",
            topic,
            operation,
            format
        );

        let encode_error = |source| PublishError::Encode {
            entity_type: P::ENTITY_TYPE,
            source,
        };
        let (event_id, delivery) = match format {
            EventFormat::Avro => {
                let record = self.publisher.to_wire(entity);
                let envelope =
                    self.factory
                        .create(record, operation, P::ENTITY_TYPE, source, &topic);
                let handle = self
                    .producer
                    .send_envelope(&topic, key.clone(), &envelope, format)
                    .map_err(encode_error)?;
                (envelope.event_id, handle)
            }
            EventFormat::Json | EventFormat::String => {
                let envelope =
                    self.factory
                        .create(entity, operation, P::ENTITY_TYPE, source, &topic);
                let handle = self
                    .producer
                    .send_envelope(&topic, key.clone(), &envelope, format)
                    .map_err(encode_error)?;
                (envelope.event_id, handle)
            }
        };

        Ok(Published {
            event_id,
            topic,
            key,
            delivery,
        })
    }

    pub fn publish_create(
        &self,
        entity: &P::Entity,
        format: EventFormat,
    ) -> Result<Published, PublishError> {
        self.publish(entity, Operation::Create, format)
    }

    pub fn publish_update(
        &self,
        entity: &P::Entity,
        format: EventFormat,
    ) -> Result<Published, PublishError> {
        self.publish(entity, Operation::Update, format)
    }

    pub fn publish_delete(
        &self,
        entity: &P::Entity,
        format: EventFormat,
    ) -> Result<Published, PublishError> {
        self.publish(entity, Operation::Delete, format)
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::codec;
    use crate::infrastructure::config::ProducerConfig;
    use crate::infrastructure::kafka_abstraction::MESSAGE_ID_HEADER;
    use crate::infrastructure::kafka_in_memory::InMemoryKafkaProducer;
    use crate::infrastructure::kafka_metrics::KafkaMetrics;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        id: i64,
        name: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct GadgetRecord {
        id: i64,
        name: String,
    }

    struct GadgetPublisher;

    impl EntityPublisher for GadgetPublisher {
        const ENTITY_TYPE: &'static str = "gadget";
        type Entity = Gadget;
        type Record = GadgetRecord;

        fn extract_key(&self, entity: &Gadget) -> Option<String> {
            Some(entity.id.to_string())
        }

        fn to_wire(&self, entity: &Gadget) -> GadgetRecord {
            GadgetRecord {
                id: entity.id,
                name: entity.name.to_uppercase(),
            }
        }

        fn event_source(&self) -> &str {
            "gadget-service"
        }
    }

    fn publisher(transport: Arc<InMemoryKafkaProducer>) -> EventPublisher<GadgetPublisher> {
        let producer = EventProducer::new(
            transport,
            &ProducerConfig::default(),
            Arc::new(KafkaMetrics::new()),
        );
        EventPublisher::new(GadgetPublisher, producer)
    }

    fn gadget() -> Gadget {
        Gadget {
            id: 3,
            name: "lamp".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_json_builds_topic_key_and_header() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        let publisher = publisher(transport.clone());

        let published = publisher
            .publish_create(&gadget(), EventFormat::Json)
            .unwrap();
        assert!(published.delivery.delivery().await.unwrap().is_ok());

        assert_eq!(published.topic, "gadget-create-json");
        let sent = transport.sent_to("gadget-create-json");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key.as_deref(), Some("3"));
        assert_eq!(
            sent[0].headers,
            vec![(MESSAGE_ID_HEADER.to_string(), published.event_id.to_string())]
        );

        let envelope = codec::decode_envelope::<Gadget>(EventFormat::Json, &sent[0].payload).unwrap();
        assert_eq!(envelope.event_type, "create");
        assert_eq!(envelope.entity_type, "gadget");
        assert_eq!(envelope.source, "gadget-service");
        assert_eq!(envelope.data, Some(gadget()));
    }

    #[tokio::test]
    async fn test_publish_avro_uses_wire_record() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        let publisher = publisher(transport.clone());

        let published = publisher
            .publish_delete(&gadget(), EventFormat::Avro)
            .unwrap();
        published.delivery.delivery().await;

        let sent = transport.sent_to("gadget-delete-avro");
        let envelope =
            codec::decode_envelope::<GadgetRecord>(EventFormat::Avro, &sent[0].payload).unwrap();
        assert_eq!(
            envelope.data,
            Some(GadgetRecord {
                id: 3,
                name: "LAMP".into()
            })
        );
    }

    #[tokio::test]
    async fn test_each_publish_gets_fresh_ids() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        let publisher = publisher(transport.clone());

        let first = publisher.publish_update(&gadget(), EventFormat::String).unwrap();
        let second = publisher.publish_update(&gadget(), EventFormat::String).unwrap();
        first.delivery.delivery().await;
        second.delivery.delivery().await;

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(transport.sent_to("gadget-update-string").len(), 2);
    }

    #[tokio::test]
    async fn test_envelope_carries_configured_producer_settings() {
        let transport = Arc::new(InMemoryKafkaProducer::new());
        let config = ProducerConfig {
            producer_region: "eu-west".to_string(),
            schema_version: "v2".to_string(),
            envelope_ttl_seconds: 120,
            ..ProducerConfig::default()
        };
        let producer = EventProducer::new(transport.clone(), &config, Arc::new(KafkaMetrics::new()));
        let publisher = EventPublisher::new(GadgetPublisher, producer);

        let published = publisher.publish_create(&gadget(), EventFormat::Avro).unwrap();
        published.delivery.delivery().await;

        let sent = transport.sent_to("gadget-create-avro");
        let envelope =
            codec::decode_envelope::<GadgetRecord>(EventFormat::Avro, &sent[0].payload).unwrap();
        assert_eq!(envelope.producer_region, "eu-west");
        assert_eq!(envelope.schema_version, "v2");
        assert_eq!(envelope.ttl, 120);
        assert_eq!(envelope.retry_count, 0);
    }
}
