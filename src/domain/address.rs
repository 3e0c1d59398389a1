use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: Option<i64>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub user_id: Option<i64>,
}

impl Address {
    pub fn new(
        id: i64,
        street: impl Into<String>,
        city: impl Into<String>,
        zip: impl Into<String>,
        user_id: i64,
    ) -> Self {
        Self {
            id: Some(id),
            street: Some(street.into()),
            city: Some(city.into()),
            zip: Some(zip.into()),
            user_id: Some(user_id),
        }
    }
}

/// Wire form of [`Address`]. Street and city are never absent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: Option<i64>,
    pub street: String,
    pub city: String,
    pub zip: Option<String>,
    pub user_id: Option<i64>,
}

impl From<&Address> for AddressRecord {
    fn from(address: &Address) -> Self {
        Self {
            id: address.id,
            street: address.street.clone().unwrap_or_default(),
            city: address.city.clone().unwrap_or_default(),
            zip: address.zip.clone(),
            user_id: address.user_id,
        }
    }
}

impl From<AddressRecord> for Address {
    fn from(record: AddressRecord) -> Self {
        Self {
            id: record.id,
            street: Some(record.street),
            city: Some(record.city),
            zip: record.zip,
            user_id: record.user_id,
        }
    }
}
