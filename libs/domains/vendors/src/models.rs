use chrono::{DateTime, Utc};
use event_bus::Provenance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use crate::events::VendorRegistered;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorStatus {
    /// Registered, verification outstanding
    #[default]
    Pending,
    Approved,
    Rejected,
    Active,
    Suspended,
    Banned,
    /// Soft delete; the document is kept
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAssignment {
    pub category_id: String,
    #[serde(default)]
    pub category_name: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_number: String,
    pub bank_name: String,
    #[serde(default)]
    pub swift_code: Option<String>,
}

/// Vendor read document, stored in the `vendors` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorReadModel {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub legal_form: Option<String>,
    pub status: VendorStatus,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    #[serde(default)]
    pub contact_person_name: Option<String>,
    #[serde(default)]
    pub contact_person_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
    #[serde(default)]
    pub categories: Vec<CategoryAssignment>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl VendorReadModel {
    pub fn registered(
        event: &VendorRegistered,
        occurred_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        let mut vendor = Self {
            id: event.vendor_id.clone(),
            name: event.name.clone(),
            business_name: event.business_name.clone(),
            tax_id: event.tax_id.clone(),
            email: event.email.clone(),
            phone: event.phone.clone(),
            legal_form: event.legal_form.clone(),
            status: event.status,
            verified: false,
            commission_rate: event.commission_rate,
            contact_person_name: None,
            contact_person_email: None,
            created_at: occurred_at,
            updated_at: occurred_at,
            bank_details: None,
            categories: Vec::new(),
            metadata: BTreeMap::new(),
            provenance,
        };
        for category_id in &event.initial_categories {
            vendor.assign_category(CategoryAssignment {
                category_id: category_id.clone(),
                category_name: None,
                assigned_at: occurred_at,
            });
        }
        vendor
    }

    pub fn touch(&mut self, occurred_at: DateTime<Utc>, provenance: Provenance) {
        self.updated_at = occurred_at;
        self.provenance = provenance;
    }

    /// A category assigned twice keeps one entry, carrying the later name.
    pub fn assign_category(&mut self, assignment: CategoryAssignment) {
        match self
            .categories
            .iter_mut()
            .find(|c| c.category_id == assignment.category_id)
        {
            Some(existing) => {
                if assignment.category_name.is_some() {
                    existing.category_name = assignment.category_name;
                }
            }
            None => self.categories.push(assignment),
        }
    }

    /// Returns `false` when the category was not assigned.
    pub fn remove_category(&mut self, category_id: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|c| c.category_id != category_id);
        self.categories.len() != before
    }
}
