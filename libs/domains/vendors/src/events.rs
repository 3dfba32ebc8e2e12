//! Vendor events as published by the write side

use chrono::{DateTime, Utc};
use event_bus::{DomainEvent, EventKind};
use serde::{Deserialize, Serialize};

use crate::models::VendorStatus;

macro_rules! vendor_event {
    ($name:ident) => {
        impl DomainEvent for $name {
            fn kind(&self) -> EventKind {
                EventKind::$name
            }

            fn aggregate_id(&self) -> String {
                self.vendor_id.clone()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorRegistered {
    pub vendor_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub status: VendorStatus,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub legal_form: Option<String>,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    #[serde(default)]
    pub initial_categories: Vec<String>,
}
vendor_event!(VendorRegistered);

/// Changed profile fields; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorUpdated {
    pub vendor_id: String,
    pub changes: VendorChanges,
}
vendor_event!(VendorUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorVerificationCompleted {
    pub vendor_id: String,
    pub verification_status: VendorStatus,
    #[serde(default)]
    pub verification_timestamp: Option<DateTime<Utc>>,
}
vendor_event!(VendorVerificationCompleted);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorStatusChanged {
    pub vendor_id: String,
    #[serde(default)]
    pub old_status: Option<VendorStatus>,
    pub new_status: VendorStatus,
    #[serde(default)]
    pub reason: Option<String>,
}
vendor_event!(VendorStatusChanged);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCategoryAssigned {
    pub vendor_id: String,
    pub category_id: String,
    #[serde(default)]
    pub category_name: Option<String>,
}
vendor_event!(VendorCategoryAssigned);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCategoryRemoved {
    pub vendor_id: String,
    pub category_id: String,
}
vendor_event!(VendorCategoryRemoved);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorBankDetailsUpdated {
    pub vendor_id: String,
    pub bank_account_number: String,
    pub bank_name: String,
    #[serde(default)]
    pub bank_swift_code: Option<String>,
}
vendor_event!(VendorBankDetailsUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorDeleted {
    pub vendor_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}
vendor_event!(VendorDeleted);
