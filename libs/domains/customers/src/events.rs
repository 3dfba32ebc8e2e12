//! Customer events as published by the write side

use event_bus::{DomainEvent, EventKind};
use serde::{Deserialize, Serialize};

use crate::models::{AddressType, CustomerPreferences};

macro_rules! customer_event {
    ($name:ident) => {
        impl DomainEvent for $name {
            fn kind(&self) -> EventKind {
                EventKind::$name
            }

            fn aggregate_id(&self) -> String {
                self.customer_id.clone()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRegistered {
    pub customer_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub registration_ip: Option<String>,
}
customer_event!(CustomerRegistered);

/// Changed profile fields; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdated {
    pub customer_id: String,
    pub changes: CustomerChanges,
}
customer_event!(CustomerUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerEmailChanged {
    pub customer_id: String,
    #[serde(default)]
    pub old_email: Option<String>,
    pub new_email: String,
}
customer_event!(CustomerEmailChanged);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerEmailVerified {
    pub customer_id: String,
    #[serde(default)]
    pub email: Option<String>,
}
customer_event!(CustomerEmailVerified);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAddressAdded {
    pub customer_id: String,
    pub address_id: String,
    pub address_type: AddressType,
    pub street: String,
    pub building_number: String,
    #[serde(default)]
    pub apartment_number: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub voivodeship: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}
customer_event!(CustomerAddressAdded);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAddressUpdated {
    pub customer_id: String,
    pub address_id: String,
    pub street: String,
    pub building_number: String,
    #[serde(default)]
    pub apartment_number: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub voivodeship: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}
customer_event!(CustomerAddressUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAddressRemoved {
    pub customer_id: String,
    pub address_id: String,
}
customer_event!(CustomerAddressRemoved);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPreferencesUpdated {
    pub customer_id: String,
    pub preferences: CustomerPreferences,
}
customer_event!(CustomerPreferencesUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDeactivated {
    pub customer_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}
customer_event!(CustomerDeactivated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerReactivated {
    pub customer_id: String,
    #[serde(default)]
    pub note: Option<String>,
}
customer_event!(CustomerReactivated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDeleted {
    pub customer_id: String,
}
customer_event!(CustomerDeleted);
