//! Event bindings for the two sample entities.

use async_trait::async_trait;

use crate::application::handlers::{EntityHandler, HandlerError};
use crate::application::publishers::EntityPublisher;
use crate::domain::{Address, AddressRecord, User, UserRecord};

#[derive(Debug, Default, Clone)]
pub struct UserEventHandler;

#[async_trait]
impl EntityHandler for UserEventHandler {
    const ENTITY_TYPE: &'static str = "user";
    type Entity = User;
    type Record = UserRecord;

    fn to_entity(&self, record: UserRecord) -> Result<User, HandlerError> {
        Ok(User::from(record))
    }

    async fn handle_create(&self, user: User) -> anyhow::Result<()> {
        tracing::info!(
            "Handling User CREATE: ID={:?}, Name={:?}, Email={:?}",
            user.id,
            user.name,
            user.email
        );
        tracing::info!(
            "Successfully processed user creation for: {}",
            user.name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(())
    }

    async fn handle_update(&self, user: User) -> anyhow::Result<()> {
        tracing::info!(
            "Handling User UPDATE: ID={:?}, Name={:?}, Email={:?}",
            user.id,
            user.name,
            user.email
        );
        Ok(())
    }

    async fn handle_delete(&self, user: User) -> anyhow::Result<()> {
        tracing::info!("Handling User DELETE: ID={:?}", user.id);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct AddressEventHandler;

#[async_trait]
impl EntityHandler for AddressEventHandler {
    const ENTITY_TYPE: &'static str = "address";
    type Entity = Address;
    type Record = AddressRecord;

    fn to_entity(&self, record: AddressRecord) -> Result<Address, HandlerError> {
        Ok(Address::from(record))
    }

    async fn handle_create(&self, address: Address) -> anyhow::Result<()> {
        tracing::info!(
            "Handling Address CREATE: ID={:?}, Street={:?}, City={:?}, UserId={:?}",
            address.id,
            address.street,
            address.city,
            address.user_id
        );
        Ok(())
    }

    async fn handle_update(&self, address: Address) -> anyhow::Result<()> {
        tracing::info!(
            "Handling Address UPDATE: ID={:?}, Street={:?}, City={:?}",
            address.id,
            address.street,
            address.city
        );
        Ok(())
    }

    async fn handle_delete(&self, address: Address) -> anyhow::Result<()> {
        tracing::info!("Handling Address DELETE: ID={:?}", address.id);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct UserEventPublisher;

impl EntityPublisher for UserEventPublisher {
    const ENTITY_TYPE: &'static str = "user";
    type Entity = User;
    type Record = UserRecord;

    fn extract_key(&self, user: &User) -> Option<String> {
        user.id.map(|id| id.to_string())
    }

    fn to_wire(&self, user: &User) -> UserRecord {
        UserRecord::from(user)
    }

    fn event_source(&self) -> &str {
        "UserEventPublisher"
    }
}

#[derive(Debug, Default, Clone)]
pub struct AddressEventPublisher;

impl EntityPublisher for AddressEventPublisher {
    const ENTITY_TYPE: &'static str = "address";
    type Entity = Address;
    type Record = AddressRecord;

    fn extract_key(&self, address: &Address) -> Option<String> {
        address.id.map(|id| id.to_string())
    }

    fn to_wire(&self, address: &Address) -> AddressRecord {
        AddressRecord::from(address)
    }

    fn event_source(&self) -> &str {
        "AddressEventPublisher"
    }
}
