//! Per-format encoding of envelopes and dead-letter records.
//!
//! * `AVRO` - the envelope and its typed record, bincode encoded.
//! * `JSON` - the envelope as JSON, `data` being the record as a JSON object.
//! * `STRING` - the envelope as JSON text, `data` being the record serialised
//!   into a JSON string.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::domain::{DeadLetterRecord, Envelope, EnvelopeMetadata, EventFormat};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("binary codec: {0}")]
    Binary(#[from] bincode::Error),
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record has no payload")]
    EmptyPayload,
    #[error("unexpected data shape: {0}")]
    Shape(String),
}

pub fn encode_envelope<T: Serialize>(
    format: EventFormat,
    envelope: &Envelope<T>,
) -> Result<Vec<u8>, CodecError> {
    match format {
        EventFormat::Avro => Ok(bincode::serialize(envelope)?),
        EventFormat::Json => {
            let data = match &envelope.data {
                Some(data) => Some(serde_json::to_value(data)?),
                None => None,
            };
            let wire = with_data(envelope, data);
            Ok(serde_json::to_vec(&wire)?)
        }
        EventFormat::String => {
            let data = match &envelope.data {
                Some(data) => Some(serde_json::to_string(data)?),
                None => None,
            };
            let wire = with_data(envelope, data);
            Ok(serde_json::to_vec(&wire)?)
        }
    }
}

pub fn decode_envelope<T: DeserializeOwned>(
    format: EventFormat,
    payload: &[u8],
) -> Result<Envelope<T>, CodecError> {
    match format {
        EventFormat::Avro => Ok(bincode::deserialize(payload)?),
        EventFormat::Json => {
            let wire: Envelope<Value> = serde_json::from_slice(payload)?;
            wire.try_map_data(json_data).map(flatten_null)
        }
        EventFormat::String => {
            let wire: Envelope<String> = serde_json::from_slice(payload)?;
            wire.try_map_data(|text| Ok(serde_json::from_str(&text)?))
        }
    }
}

/// Envelope fields only. Works for any payload type because `data` is the
/// last field of the binary layout and an ignored key in JSON.
pub fn decode_metadata(format: EventFormat, payload: &[u8]) -> Result<EnvelopeMetadata, CodecError> {
    match format {
        EventFormat::Avro => Ok(bincode::deserialize(payload)?),
        EventFormat::Json | EventFormat::String => Ok(serde_json::from_slice(payload)?),
    }
}

pub fn encode_dead_letter(
    format: EventFormat,
    record: &DeadLetterRecord,
) -> Result<Vec<u8>, CodecError> {
    match format {
        EventFormat::Avro => Ok(bincode::serialize(record)?),
        EventFormat::Json | EventFormat::String => Ok(serde_json::to_vec(record)?),
    }
}

pub fn decode_dead_letter(
    format: EventFormat,
    payload: &[u8],
) -> Result<DeadLetterRecord, CodecError> {
    match format {
        EventFormat::Avro => Ok(bincode::deserialize(payload)?),
        EventFormat::Json | EventFormat::String => Ok(serde_json::from_slice(payload)?),
    }
}

fn with_data<T, U>(envelope: &Envelope<T>, data: Option<U>) -> Envelope<U> {
    let metadata = envelope.metadata();
    Envelope {
        event_id: metadata.event_id,
        event_type: metadata.event_type,
        entity_type: metadata.entity_type,
        source: metadata.source,
        topic: metadata.topic,
        schema_version: metadata.schema_version,
        trace_id: metadata.trace_id,
        producer_region: metadata.producer_region,
        retry_count: metadata.retry_count,
        ttl: metadata.ttl,
        timestamp: metadata.timestamp,
        data,
    }
}

/// JSON producers may send `data` as an object or as an embedded JSON string.
fn json_data<T: DeserializeOwned>(value: Value) -> Result<Option<T>, CodecError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => Ok(Some(serde_json::from_str(&text)?)),
        other @ Value::Object(_) => Ok(Some(serde_json::from_value(other)?)),
        other => Err(CodecError::Shape(format!(
            "expected object or string, got {}",
            other
        ))),
    }
}

fn flatten_null<T>(mut envelope: Envelope<Option<T>>) -> Envelope<T> {
    let data = envelope.data.take().flatten();
    with_data(&envelope, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvelopeFactory, Operation, User, UserRecord};

    fn user_envelope(topic: &str) -> Envelope<UserRecord> {
        let user = User::new(7, "Grace", "grace@example.com", 45);
        EnvelopeFactory::default().create(
            UserRecord::from(&user),
            Operation::Create,
            "user",
            "user-service",
            topic,
        )
    }

    #[test]
    fn every_format_carries_the_same_envelope() {
        for format in [EventFormat::Avro, EventFormat::Json, EventFormat::String] {
            let envelope = user_envelope("user-create-x");
            let bytes = encode_envelope(format, &envelope).unwrap();
            let decoded: Envelope<UserRecord> = decode_envelope(format, &bytes).unwrap();
            assert_eq!(decoded, envelope, "format {}", format);
        }
    }

    #[test]
    fn string_format_embeds_data_as_text() {
        let envelope = user_envelope("user-create-string");
        let bytes = encode_envelope(EventFormat::String, &envelope).unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw["data"].is_string());
        assert_eq!(raw["event_type"], "create");
    }

    #[test]
    fn json_accepts_data_as_embedded_string() {
        let envelope = user_envelope("user-create-json");
        let bytes = encode_envelope(EventFormat::String, &envelope).unwrap();
        let decoded: Envelope<UserRecord> = decode_envelope(EventFormat::Json, &bytes).unwrap();
        assert_eq!(decoded.data, envelope.data);
    }

    #[test]
    fn json_null_data_decodes_to_none() {
        let mut envelope = user_envelope("user-create-json");
        envelope.data = None;
        let bytes = encode_envelope(EventFormat::Json, &envelope).unwrap();
        let decoded: Envelope<UserRecord> = decode_envelope(EventFormat::Json, &bytes).unwrap();
        assert!(decoded.data.is_none());
    }

    #[test]
    fn metadata_decodes_without_payload_type() {
        let envelope = user_envelope("user-create-avro");
        for format in [EventFormat::Avro, EventFormat::Json] {
            let bytes = encode_envelope(format, &envelope).unwrap();
            let metadata = decode_metadata(format, &bytes).unwrap();
            assert_eq!(metadata, envelope.metadata());
        }
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let result: Result<Envelope<UserRecord>, _> = decode_envelope(EventFormat::Json, b"{nope");
        assert!(matches!(result, Err(CodecError::Json(_))));
        let result: Result<Envelope<UserRecord>, _> = decode_envelope(EventFormat::Avro, &[1, 2]);
        assert!(matches!(result, Err(CodecError::Binary(_))));
    }
}
