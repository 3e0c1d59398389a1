use serde::{Deserialize, Serialize};

use super::address::{Address, AddressRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub addresses: Option<Vec<Address>>,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>, email: impl Into<String>, age: i32) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
            email: Some(email.into()),
            age: Some(age),
            addresses: None,
        }
    }

    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.addresses = Some(addresses);
        self
    }
}

/// Wire form of [`User`] carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub addresses: Option<Vec<AddressRecord>>,
}

impl From<&User> for UserRecord {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone().unwrap_or_default(),
            email: user.email.clone(),
            age: user.age,
            addresses: user
                .addresses
                .as_ref()
                .map(|list| list.iter().map(AddressRecord::from).collect()),
        }
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            name: Some(record.name),
            email: record.email,
            age: record.age,
            addresses: record
                .addresses
                .map(|list| list.into_iter().map(Address::from).collect()),
        }
    }
}
