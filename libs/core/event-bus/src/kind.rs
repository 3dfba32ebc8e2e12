//! Closed set of event kinds known to this system
//!
//! Dispatch keys on [`EventKind`], not on free-form strings. Wire values that
//! do not name a known kind decode to [`EventKind::Unrecognized`] so newer
//! producers never break older consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    CustomerRegistered,
    CustomerUpdated,
    CustomerEmailChanged,
    CustomerEmailVerified,
    CustomerAddressAdded,
    CustomerAddressUpdated,
    CustomerAddressRemoved,
    CustomerPreferencesUpdated,
    CustomerDeactivated,
    CustomerReactivated,
    CustomerDeleted,

    CategoryCreated,
    CategoryUpdated,
    SubcategoryAdded,
    CategoryDeleted,

    ProductCreated,
    ProductUpdated,
    ProductPriceUpdated,
    ProductStockUpdated,
    ProductReserved,
    ProductReservationConfirmed,
    ProductReservationReleased,
    ProductVariantAdded,
    ProductDeleted,

    VendorRegistered,
    VendorUpdated,
    VendorVerificationCompleted,
    VendorStatusChanged,
    VendorCategoryAssigned,
    VendorCategoryRemoved,
    VendorBankDetailsUpdated,
    VendorDeleted,

    #[strum(default)]
    Unrecognized(String),
}

impl EventKind {
    /// Parse a wire value; never fails.
    pub fn parse(value: &str) -> Self {
        value
            .parse()
            .unwrap_or_else(|_| EventKind::Unrecognized(value.to_string()))
    }

    /// Logical type identifier as written on the wire
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Unrecognized(name) => name.as_str(),
            known => <&'static str>::from(known),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, EventKind::Unrecognized(_))
    }

    /// Declared topic for this kind, `None` for unrecognized kinds
    pub fn topic(&self) -> Option<&'static str> {
        let topic = match self {
            EventKind::CustomerRegistered => "customer.registered.event",
            EventKind::CustomerUpdated => "customer.updated.event",
            EventKind::CustomerEmailChanged => "customer.email-changed.event",
            EventKind::CustomerEmailVerified => "customer.email-verified.event",
            EventKind::CustomerAddressAdded => "customer.address-added.event",
            EventKind::CustomerAddressUpdated => "customer.address-updated.event",
            EventKind::CustomerAddressRemoved => "customer.address-removed.event",
            EventKind::CustomerPreferencesUpdated => "customer.preferences-updated.event",
            EventKind::CustomerDeactivated => "customer.deactivated.event",
            EventKind::CustomerReactivated => "customer.reactivated.event",
            EventKind::CustomerDeleted => "customer.deleted.event",
            EventKind::CategoryCreated => "category.created.event",
            EventKind::CategoryUpdated => "category.updated.event",
            EventKind::SubcategoryAdded => "category.subcategory-added.event",
            EventKind::CategoryDeleted => "category.deleted.event",
            EventKind::ProductCreated => "product.created.event",
            EventKind::ProductUpdated => "product.updated.event",
            EventKind::ProductPriceUpdated => "product.price-updated.event",
            EventKind::ProductStockUpdated => "product.stock-updated.event",
            EventKind::ProductReserved => "product.reserved.event",
            EventKind::ProductReservationConfirmed => "product.reservation-confirmed.event",
            EventKind::ProductReservationReleased => "product.reservation-released.event",
            EventKind::ProductVariantAdded => "product.variant-added.event",
            EventKind::ProductDeleted => "product.deleted.event",
            EventKind::VendorRegistered => "vendor.registered.event",
            EventKind::VendorUpdated => "vendor.updated.event",
            EventKind::VendorVerificationCompleted => "vendor.verification.completed.event",
            EventKind::VendorStatusChanged => "vendor.status.changed.event",
            EventKind::VendorCategoryAssigned => "vendor.category-assigned.event",
            EventKind::VendorCategoryRemoved => "vendor.category-removed.event",
            EventKind::VendorBankDetailsUpdated => "vendor.bank-details-updated.event",
            EventKind::VendorDeleted => "vendor.deleted.event",
            EventKind::Unrecognized(_) => return None,
        };
        Some(topic)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Unrecognized(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        EventKind::parse(&value)
    }
}
