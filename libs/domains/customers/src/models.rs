use chrono::{DateTime, Utc};
use event_bus::Provenance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use crate::events::{CustomerAddressAdded, CustomerAddressUpdated, CustomerRegistered};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
    /// Soft delete; the document is kept
    Deleted,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    #[default]
    Shipping,
    Billing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
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

impl From<&CustomerAddressAdded> for Address {
    fn from(event: &CustomerAddressAdded) -> Self {
        Self {
            id: event.address_id.clone(),
            address_type: event.address_type,
            street: event.street.clone(),
            building_number: event.building_number.clone(),
            apartment_number: event.apartment_number.clone(),
            city: event.city.clone(),
            postal_code: event.postal_code.clone(),
            country: event.country.clone(),
            voivodeship: event.voivodeship.clone(),
            is_default: event.is_default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPreferences {
    #[serde(default)]
    pub marketing_consent: bool,
    #[serde(default)]
    pub newsletter_subscribed: bool,
    pub preferred_language: String,
    pub preferred_currency: String,
    #[serde(default)]
    pub favorite_categories: Vec<String>,
}

impl Default for CustomerPreferences {
    fn default() -> Self {
        Self {
            marketing_consent: false,
            newsletter_subscribed: false,
            preferred_language: "pl".to_string(),
            preferred_currency: "PLN".to_string(),
            favorite_categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalData {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Customer read document, stored in the `customers` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerReadModel {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub registration_ip: Option<String>,
    #[serde(default)]
    pub personal_data: PersonalData,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub preferences: CustomerPreferences,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl CustomerReadModel {
    /// Initial document for a registration that happened at `occurred_at`.
    pub fn registered(
        event: &CustomerRegistered,
        occurred_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: event.customer_id.clone(),
            email: event.email.clone(),
            first_name: event.first_name.clone(),
            last_name: event.last_name.clone(),
            phone_number: event.phone_number.clone(),
            email_verified: false,
            phone_verified: false,
            status: CustomerStatus::Active,
            created_at: occurred_at,
            updated_at: occurred_at,
            registration_ip: event.registration_ip.clone(),
            personal_data: PersonalData {
                email: event.email.clone(),
                first_name: event.first_name.clone(),
                last_name: event.last_name.clone(),
                phone_number: event.phone_number.clone(),
            },
            addresses: Vec::new(),
            preferences: CustomerPreferences::default(),
            metadata: BTreeMap::new(),
            provenance,
        }
    }

    /// Record that `operation` touched this document.
    pub fn touch(&mut self, occurred_at: DateTime<Utc>, provenance: Provenance) {
        self.updated_at = occurred_at;
        self.provenance = provenance;
    }

    /// Add `address`; a new default clears the default flag on siblings of
    /// the same type. A redelivered address replaces its earlier copy.
    pub fn add_address(&mut self, address: Address) {
        if address.is_default {
            for existing in &mut self.addresses {
                if existing.address_type == address.address_type {
                    existing.is_default = false;
                }
            }
        }
        match self.addresses.iter_mut().find(|a| a.id == address.id) {
            Some(existing) => *existing = address,
            None => self.addresses.push(address),
        }
    }

    /// Returns `false` when no address has that id.
    pub fn update_address(&mut self, event: &CustomerAddressUpdated) -> bool {
        let Some(index) = self.addresses.iter().position(|a| a.id == event.address_id) else {
            return false;
        };

        let address = &mut self.addresses[index];
        address.street = event.street.clone();
        address.building_number = event.building_number.clone();
        address.apartment_number = event.apartment_number.clone();
        address.city = event.city.clone();
        address.postal_code = event.postal_code.clone();
        address.country = event.country.clone();
        address.voivodeship = event.voivodeship.clone();

        if event.is_default {
            let address_type = address.address_type;
            for (i, other) in self.addresses.iter_mut().enumerate() {
                if other.address_type == address_type {
                    other.is_default = i == index;
                }
            }
        }
        true
    }

    /// Remove the address with `address_id`. If it was a default, the first
    /// remaining address of the same type becomes the default.
    pub fn remove_address(&mut self, address_id: &str) -> bool {
        let Some(index) = self.addresses.iter().position(|a| a.id == address_id) else {
            return false;
        };

        let removed = self.addresses.remove(index);
        if removed.is_default {
            if let Some(next) = self
                .addresses
                .iter_mut()
                .find(|a| a.address_type == removed.address_type)
            {
                next.is_default = true;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(id: &str, address_type: AddressType, is_default: bool) -> Address {
        Address {
            id: id.into(),
            address_type,
            street: "Długa".into(),
            building_number: "1".into(),
            apartment_number: None,
            city: "Kraków".into(),
            postal_code: "30-001".into(),
            country: "PL".into(),
            voivodeship: Some("małopolskie".into()),
            is_default,
        }
    }

    fn customer() -> CustomerReadModel {
        let event = CustomerRegistered {
            customer_id: "c-1".into(),
            email: "a@b.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: Some("+48123".into()),
            registration_ip: None,
        };
        CustomerReadModel::registered(&event, Utc::now(), Provenance::default())
    }

    fn defaults(customer: &CustomerReadModel) -> Vec<(&str, bool)> {
        customer
            .addresses
            .iter()
            .map(|a| (a.id.as_str(), a.is_default))
            .collect()
    }

    #[test]
    fn test_registered_defaults() {
        let customer = customer();
        assert_eq!(customer.status, CustomerStatus::Active);
        assert!(!customer.email_verified);
        assert_eq!(customer.personal_data.email, "a@b.com");
        assert_eq!(customer.preferences.preferred_currency, "PLN");
    }

    #[test]
    fn test_new_default_address_clears_same_type_only() {
        let mut customer = customer();
        customer.add_address(address("s1", AddressType::Shipping, true));
        customer.add_address(address("b1", AddressType::Billing, true));
        customer.add_address(address("s2", AddressType::Shipping, true));

        assert_eq!(
            defaults(&customer),
            vec![("s1", false), ("b1", true), ("s2", true)]
        );
    }

    #[test]
    fn test_redelivered_address_is_not_duplicated() {
        let mut customer = customer();
        customer.add_address(address("s1", AddressType::Shipping, true));
        customer.add_address(address("s1", AddressType::Shipping, true));

        assert_eq!(defaults(&customer), vec![("s1", true)]);
    }

    #[test]
    fn test_update_address_can_take_default() {
        let mut customer = customer();
        customer.add_address(address("s1", AddressType::Shipping, true));
        customer.add_address(address("s2", AddressType::Shipping, false));

        let update = CustomerAddressUpdated {
            customer_id: "c-1".into(),
            address_id: "s2".into(),
            street: "Krótka".into(),
            building_number: "7".into(),
            apartment_number: Some("3".into()),
            city: "Kraków".into(),
            postal_code: "30-002".into(),
            country: "PL".into(),
            voivodeship: None,
            is_default: true,
        };
        assert!(customer.update_address(&update));
        assert_eq!(defaults(&customer), vec![("s1", false), ("s2", true)]);
        assert_eq!(customer.addresses[1].street, "Krótka");

        let missing = CustomerAddressUpdated {
            address_id: "nope".into(),
            ..update
        };
        assert!(!customer.update_address(&missing));
    }

    #[test]
    fn test_removing_default_promotes_sibling() {
        let mut customer = customer();
        customer.add_address(address("s1", AddressType::Shipping, true));
        customer.add_address(address("b1", AddressType::Billing, false));
        customer.add_address(address("s2", AddressType::Shipping, false));

        assert!(customer.remove_address("s1"));
        assert_eq!(defaults(&customer), vec![("b1", false), ("s2", true)]);
        assert!(!customer.remove_address("s1"));
    }

    #[test]
    fn test_document_shape() {
        let mut customer = customer();
        customer.provenance.last_operation = Some("CreateCustomer".into());
        let document = serde_json::to_value(&customer).unwrap();

        assert_eq!(document["_id"], "c-1");
        assert_eq!(document["status"], "ACTIVE");
        assert_eq!(document["personalData"]["firstName"], "Ada");
        assert_eq!(document["lastOperation"], "CreateCustomer");

        let back: CustomerReadModel = serde_json::from_value(document).unwrap();
        assert_eq!(back, customer);
    }
}
