use std::collections::HashMap;
use std::sync::Arc;

use crate::application::handlers::{EntityHandler, EventHandler};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate handler for entity type '{0}'")]
    DuplicateHandler(String),
    #[error("entity type must not be blank")]
    BlankEntityType,
}

/// Entity type to handler, keyed by the lower-cased entity type name.
///
/// Registration happens once at start-up. The registry is then shared
/// behind an `Arc` and only read.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        entity_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), RegistryError> {
        let key = entity_type.trim().to_lowercase();
        if key.is_empty() {
            return Err(RegistryError::BlankEntityType);
        }
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateHandler(key));
        }
        tracing::info!("Registered event handler for entity type '{}'", key);
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Registers `handler` under its own entity type.
    pub fn register_handler<H: EntityHandler>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register(H::ENTITY_TYPE, Arc::new(handler))
    }

    /// Lookup is normalized the same way as registration.
    pub fn get(&self, entity_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&entity_type.trim().to_lowercase()).cloned()
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::{HandleReport, HandlerError};
    use async_trait::async_trait;

    struct NamedHandler(&'static str);

    #[async_trait]
    impl EventHandler for NamedHandler {
        fn entity_type(&self) -> &'static str {
            self.0
        }

        async fn handle_avro(&self, _: &[u8], _: &str) -> Result<HandleReport, HandlerError> {
            unimplemented!()
        }

        async fn handle_json(&self, _: &[u8], _: &str) -> Result<HandleReport, HandlerError> {
            unimplemented!()
        }

        async fn handle_string(&self, _: &[u8], _: &str) -> Result<HandleReport, HandlerError> {
            unimplemented!()
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("User", Arc::new(NamedHandler("user")))
            .unwrap();

        assert!(registry.get("user").is_some());
        assert!(registry.get("USER").is_some());
        assert!(registry.get("  User ").is_some());
        assert!(registry.get("address").is_none());
        assert_eq!(registry.entity_types(), vec!["user".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("user", Arc::new(NamedHandler("user")))
            .unwrap();
        let result = registry.register(" USER ", Arc::new(NamedHandler("USER")));

        assert_eq!(
            result.err(),
            Some(RegistryError::DuplicateHandler("user".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_blank_entity_type_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register("  ", Arc::new(NamedHandler("")))
            .unwrap_err();
        assert_eq!(err, RegistryError::BlankEntityType);
        assert!(registry.is_empty());
    }
}
