use strum::IntoEnumIterator;

use crate::domain::{EventFormat, Operation};
use crate::infrastructure::config::TopicsConfig;

/// `<entity>-<operation>-<format>`, entity lower-cased.
pub fn topic_name(entity_type: &str, operation: Operation, format: EventFormat) -> String {
    format!(
        "{}-{}-{}",
        entity_type.trim().to_lowercase(),
        operation.as_str(),
        format.suffix()
    )
}

/// The part of the topic before the first `-`, or the whole topic when
/// there is no separator (or it is the first character).
pub fn entity_type_from_topic(topic: &str) -> &str {
    match topic.find('-') {
        Some(idx) if idx > 0 => &topic[..idx],
        _ => topic,
    }
}

pub fn dead_letter_topic(original_topic: &str, suffix: &str) -> String {
    format!("{}{}", original_topic, suffix)
}

/// Builds subscription lists from the configured entity names.
#[derive(Debug, Clone)]
pub struct TopicsProvider {
    config: TopicsConfig,
}

impl TopicsProvider {
    pub fn new(config: TopicsConfig) -> Self {
        Self { config }
    }

    fn generate(entities: &[String], format: EventFormat) -> Vec<String> {
        let topics: Vec<String> = entities
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .flat_map(|entity| Operation::iter().map(move |op| topic_name(entity, op, format)))
            .collect();
        tracing::info!("TopicsProvider: {} topics -> {:?}", format, topics);
        topics
    }

    pub fn topics_for(&self, format: EventFormat) -> Vec<String> {
        match format {
            EventFormat::Avro => Self::generate(&self.config.avro, format),
            EventFormat::Json => Self::generate(&self.config.json, format),
            EventFormat::String => Self::generate(&self.config.string, format),
        }
    }

    pub fn avro_topics(&self) -> Vec<String> {
        self.topics_for(EventFormat::Avro)
    }

    pub fn json_topics(&self) -> Vec<String> {
        self.topics_for(EventFormat::Json)
    }

    pub fn string_topics(&self) -> Vec<String> {
        self.topics_for(EventFormat::String)
    }

    /// Every event topic across all formats.
    pub fn all_topics(&self) -> Vec<String> {
        EventFormat::iter()
            .flat_map(|format| self.topics_for(format))
            .collect()
    }

    pub fn dead_letter_topics(&self, suffix: &str) -> Vec<String> {
        self.all_topics()
            .iter()
            .map(|t| dead_letter_topic(t, suffix))
            .collect()
    }

    pub fn observe_dead_letters(&self) -> bool {
        self.config.observe_dead_letters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_round_trip() {
        let topic = topic_name("user", Operation::Create, EventFormat::Avro);
        assert_eq!(topic, "user-create-avro");
        assert_eq!(entity_type_from_topic(&topic), "user");
        assert_eq!(topic_name("Address", Operation::Delete, EventFormat::String), "address-delete-string");
    }

    #[test]
    fn entity_type_without_separator() {
        assert_eq!(entity_type_from_topic("orders"), "orders");
        assert_eq!(entity_type_from_topic("-weird"), "-weird");
    }

    #[test]
    fn dead_letter_name() {
        assert_eq!(dead_letter_topic("user-create-json", "-dlt"), "user-create-json-dlt");
    }

    #[test]
    fn provider_generates_per_format() {
        let provider = TopicsProvider::new(TopicsConfig {
            avro: vec!["user".into(), " ".into(), " address ".into()],
            json: vec!["user".into()],
            string: vec![],
            observe_dead_letters: false,
        });

        assert_eq!(
            provider.avro_topics(),
            vec![
                "user-create-avro",
                "user-update-avro",
                "user-delete-avro",
                "address-create-avro",
                "address-update-avro",
                "address-delete-avro",
            ]
        );
        assert_eq!(provider.json_topics().len(), 3);
        assert!(provider.string_topics().is_empty());
        assert_eq!(provider.all_topics().len(), 9);
        assert!(provider
            .dead_letter_topics("-dlt")
            .contains(&"user-update-json-dlt".to_string()));
    }
}
