//! Category and product events as published by the write side

use event_bus::{DomainEvent, EventKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ProductAttribute, ProductStatus};

macro_rules! catalog_event {
    ($name:ident, $id:ident) => {
        impl DomainEvent for $name {
            fn kind(&self) -> EventKind {
                EventKind::$name
            }

            fn aggregate_id(&self) -> String {
                self.$id.clone()
            }
        }
    };
}

fn default_currency() -> String {
    "USD".to_string()
}

fn active() -> bool {
    true
}

// Categories

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCreated {
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub parent_category_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default = "active")]
    pub active: bool,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub display_order: i32,
}
catalog_event!(CategoryCreated, category_id);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdated {
    pub category_id: String,
    pub changes: CategoryChanges,
}
catalog_event!(CategoryUpdated, category_id);

/// `category_id` is the parent gaining `subcategory_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubcategoryAdded {
    pub category_id: String,
    pub subcategory_id: String,
}
catalog_event!(SubcategoryAdded, category_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDeleted {
    pub category_id: String,
}
catalog_event!(CategoryDeleted, category_id);

// Products

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sku: String,
    pub price: f64,
    #[serde(default)]
    pub discounted_price: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub initial_stock: i64,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
}
catalog_event!(ProductCreated, product_id);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<ProductAttribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdated {
    pub product_id: String,
    pub changes: ProductChanges,
}
catalog_event!(ProductUpdated, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPriceUpdated {
    pub product_id: String,
    pub price: f64,
    #[serde(default)]
    pub discounted_price: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
}
catalog_event!(ProductPriceUpdated, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStockUpdated {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub warehouse_id: Option<String>,
}
catalog_event!(ProductStockUpdated, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReserved {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub reservation_id: Option<String>,
}
catalog_event!(ProductReserved, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReservationConfirmed {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}
catalog_event!(ProductReservationConfirmed, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReservationReleased {
    pub product_id: String,
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
catalog_event!(ProductReservationReleased, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariantAdded {
    pub product_id: String,
    pub variant_id: String,
    pub sku: String,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub stock: i64,
}
catalog_event!(ProductVariantAdded, product_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDeleted {
    pub product_id: String,
}
catalog_event!(ProductDeleted, product_id);
