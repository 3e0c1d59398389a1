use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Logical operation carried by an envelope's `event_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Case-insensitive parse. Anything other than create/update/delete is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse().ok()
    }
}

/// Wire format of a topic. Selects the serializer, never the retry logic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum EventFormat {
    Avro,
    Json,
    String,
}

impl EventFormat {
    /// Topic suffix, without the separator.
    pub fn suffix(&self) -> &'static str {
        match self {
            EventFormat::Avro => "avro",
            EventFormat::Json => "json",
            EventFormat::String => "string",
        }
    }

    /// Infers the format from a topic name.
    ///
    /// The last `-` separated segment wins when it names a format
    /// (`user-create-json`). Otherwise the name is searched for `json` then
    /// `string`, which is how dead-letter topics (`user-create-json-dlt`)
    /// resolve. Everything else is binary.
    pub fn from_topic(topic: &str) -> Self {
        match topic.rsplit('-').next() {
            Some("avro") => return EventFormat::Avro,
            Some("json") => return EventFormat::Json,
            Some("string") => return EventFormat::String,
            _ => {}
        }

        if topic.contains("json") {
            EventFormat::Json
        } else if topic.contains("string") {
            EventFormat::String
        } else {
            EventFormat::Avro
        }
    }
}
