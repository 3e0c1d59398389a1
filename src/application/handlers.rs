use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::domain::{Envelope, EventFormat, Operation};
use crate::infrastructure::codec::{self, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("could not decode envelope: {0}")]
    Decode(#[from] CodecError),
    #[error("invalid {entity_type} payload: {reason}")]
    InvalidPayload { entity_type: String, reason: String },
    #[error("business callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}

/// What a handler did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Applied(Operation),
    /// `data` was absent. Treated as a no-op.
    EmptyPayload,
    /// `event_type` named no known operation. Logged and skipped.
    UnknownOperation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    pub event_type: String,
    pub disposition: Disposition,
}

impl HandleReport {
    fn new(event_type: &str, disposition: Disposition) -> Self {
        Self {
            event_type: event_type.to_lowercase(),
            disposition,
        }
    }
}

/// Business logic for one entity type.
///
/// The binary format carries `Record`, mapped to the entity with
/// [`EntityHandler::to_entity`]. The JSON formats carry the entity itself.
#[async_trait]
pub trait EntityHandler: Send + Sync + 'static {
    const ENTITY_TYPE: &'static str;

    type Entity: DeserializeOwned + Debug + Send + Sync;
    type Record: DeserializeOwned + Send;

    fn to_entity(&self, record: Self::Record) -> Result<Self::Entity, HandlerError>;

    async fn handle_create(&self, entity: Self::Entity) -> anyhow::Result<()>;

    async fn handle_update(&self, entity: Self::Entity) -> anyhow::Result<()>;

    async fn handle_delete(&self, entity: Self::Entity) -> anyhow::Result<()>;
}

/// Object-safe view of an [`EntityHandler`], stored in the registry.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn entity_type(&self) -> &'static str;

    async fn handle_avro(&self, payload: &[u8], topic: &str) -> Result<HandleReport, HandlerError>;

    async fn handle_json(&self, payload: &[u8], topic: &str) -> Result<HandleReport, HandlerError>;

    async fn handle_string(&self, payload: &[u8], topic: &str)
        -> Result<HandleReport, HandlerError>;

    async fn handle(
        &self,
        format: EventFormat,
        payload: &[u8],
        topic: &str,
    ) -> Result<HandleReport, HandlerError> {
        match format {
            EventFormat::Avro => self.handle_avro(payload, topic).await,
            EventFormat::Json => self.handle_json(payload, topic).await,
            EventFormat::String => self.handle_string(payload, topic).await,
        }
    }
}

#[async_trait]
impl<H: EntityHandler> EventHandler for H {
    fn entity_type(&self) -> &'static str {
        H::ENTITY_TYPE
    }

    async fn handle_avro(&self, payload: &[u8], topic: &str) -> Result<HandleReport, HandlerError> {
        let envelope: Envelope<H::Record> = codec::decode_envelope(EventFormat::Avro, payload)?;
        let envelope = match accept::<H, _>(envelope, EventFormat::Avro, topic) {
            Ok(envelope) => envelope,
            Err(report) => return Ok(report),
        };
        let envelope = envelope.try_map_data(|record| self.to_entity(record))?;
        apply(self, envelope, EventFormat::Avro).await
    }

    async fn handle_json(&self, payload: &[u8], topic: &str) -> Result<HandleReport, HandlerError> {
        let envelope: Envelope<H::Entity> = codec::decode_envelope(EventFormat::Json, payload)?;
        match accept::<H, _>(envelope, EventFormat::Json, topic) {
            Ok(envelope) => apply(self, envelope, EventFormat::Json).await,
            Err(report) => Ok(report),
        }
    }

    async fn handle_string(
        &self,
        payload: &[u8],
        topic: &str,
    ) -> Result<HandleReport, HandlerError> {
        let envelope: Envelope<H::Entity> = codec::decode_envelope(EventFormat::String, payload)?;
        match accept::<H, _>(envelope, EventFormat::String, topic) {
            Ok(envelope) => apply(self, envelope, EventFormat::String).await,
            Err(report) => Ok(report),
        }
    }
}

/// Audits the event, or reports it as empty when it carries no data.
fn accept<H: EntityHandler, T>(
    envelope: Envelope<T>,
    format: EventFormat,
    topic: &str,
) -> Result<Envelope<T>, HandleReport> {
    if envelope.data.is_none() {
        tracing::warn!(
            event_id = %envelope.event_id,
            "[{}] Event payload is null for {}. Skipping.",
            format,
            H::ENTITY_TYPE
        );
        return Err(HandleReport::new(
            &envelope.event_type,
            Disposition::EmptyPayload,
        ));
    }
    tracing::info!(
        event_id = %envelope.event_id,
        trace_id = %envelope.trace_id,
        "Auditing event: Operation={}, EntityType={}, Topic={}",
        envelope.event_type,
        H::ENTITY_TYPE,
        topic
    );
    Ok(envelope)
}

async fn apply<H: EntityHandler>(
    handler: &H,
    envelope: Envelope<H::Entity>,
    format: EventFormat,
) -> Result<HandleReport, HandlerError> {
    let event_type = envelope.event_type.clone();
    let Some(entity) = envelope.data else {
        return Ok(HandleReport::new(&event_type, Disposition::EmptyPayload));
    };

    let Some(operation) = Operation::parse(&event_type) else {
        tracing::warn!("Unknown operation: {}", event_type);
        return Ok(HandleReport::new(
            &event_type,
            Disposition::UnknownOperation(event_type.to_lowercase()),
        ));
    };

    tracing::info!("[{}] Handling {} {}: {:?}", format, operation, H::ENTITY_TYPE, entity);
    let result = match operation {
        Operation::Create => handler.handle_create(entity).await,
        Operation::Update => handler.handle_update(entity).await,
        Operation::Delete => handler.handle_delete(entity).await,
    };
    result.map_err(HandlerError::Callback)?;

    Ok(HandleReport::new(&event_type, Disposition::Applied(operation)))
}
