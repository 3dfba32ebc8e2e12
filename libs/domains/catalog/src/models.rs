use chrono::{DateTime, Utc};
use event_bus::Provenance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use crate::events::{CategoryCreated, ProductCreated, ProductVariantAdded};

pub const DEFAULT_WAREHOUSE: &str = "DEFAULT";

/// Category field listing the products included in its `productCount`
pub const COUNTED_PRODUCT_IDS: &str = "countedProductIds";

/// Child entry kept on the parent category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryRef {
    pub id: String,
    pub name: String,
}

/// Category read document, stored in the `categories` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReadModel {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub parent_category_id: Option<String>,
    #[serde(default)]
    pub parent_category_name: Option<String>,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryRef>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub active: bool,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub product_count: i64,
    /// Products included in `product_count`, one entry each
    #[serde(default)]
    pub counted_product_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl CategoryReadModel {
    pub fn created(
        event: &CategoryCreated,
        parent_name: Option<String>,
        occurred_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: event.category_id.clone(),
            name: event.name.clone(),
            description: event.description.clone(),
            slug: event.slug.clone(),
            parent_category_id: event.parent_category_id.clone(),
            parent_category_name: parent_name,
            subcategories: Vec::new(),
            attributes: event.attributes.clone(),
            active: event.active,
            icon_url: event.icon_url.clone(),
            image_url: event.image_url.clone(),
            display_order: event.display_order,
            product_count: 0,
            counted_product_ids: Vec::new(),
            created_at: occurred_at,
            updated_at: occurred_at,
            provenance,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_category_id.is_none()
    }

    pub fn subcategory(&self) -> SubcategoryRef {
        SubcategoryRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Draft,
    #[default]
    Active,
    Inactive,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    pub regular: f64,
    #[serde(default)]
    pub discounted: Option<f64>,
    pub currency: String,
}

impl PriceInfo {
    pub fn current(&self) -> f64 {
        self.discounted.unwrap_or(self.regular)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockInfo {
    #[serde(default)]
    pub available: i64,
    #[serde(default)]
    pub reserved: i64,
    pub warehouse_id: String,
}

impl Default for StockInfo {
    fn default() -> Self {
        Self {
            available: 0,
            reserved: 0,
            warehouse_id: DEFAULT_WAREHOUSE.to_string(),
        }
    }
}

impl StockInfo {
    /// Settle a confirmed reservation of `quantity`; neither counter drops below zero.
    pub fn confirm(&mut self, quantity: i64) {
        self.reserved = (self.reserved - quantity).max(0);
        self.available = (self.available - quantity).max(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    pub sku: String,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    pub price: PriceInfo,
    #[serde(default)]
    pub stock: StockInfo,
}

impl ProductVariant {
    /// Variant from the event; the currency falls back to the product's.
    pub fn added(event: &ProductVariantAdded, product_currency: &str) -> Self {
        Self {
            id: event.variant_id.clone(),
            sku: event.sku.clone(),
            attributes: event.attributes.clone(),
            price: PriceInfo {
                regular: event.price,
                discounted: None,
                currency: event
                    .currency
                    .clone()
                    .unwrap_or_else(|| product_currency.to_string()),
            },
            stock: StockInfo {
                available: event.stock,
                ..StockInfo::default()
            },
        }
    }
}

/// Product read document, stored in the `products` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReadModel {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sku: String,
    #[serde(default)]
    pub category_ids: Vec<String>,
    #[serde(default)]
    pub category_names: Vec<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub price: PriceInfo,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
    #[serde(default)]
    pub stock: StockInfo,
    pub status: ProductStatus,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl ProductReadModel {
    pub fn created(
        event: &ProductCreated,
        category_names: Vec<String>,
        occurred_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: event.product_id.clone(),
            name: event.name.clone(),
            description: event.description.clone(),
            sku: event.sku.clone(),
            category_ids: distinct(&event.categories),
            category_names,
            vendor_id: event.vendor_id.clone(),
            price: PriceInfo {
                regular: event.price,
                discounted: event.discounted_price,
                currency: event.currency.clone(),
            },
            attributes: event.attributes.clone(),
            variants: Vec::new(),
            stock: StockInfo {
                available: event.initial_stock,
                ..StockInfo::default()
            },
            status: event.status,
            images: event.images.clone(),
            brand_name: event.brand_name.clone(),
            featured: false,
            metadata: BTreeMap::new(),
            created_at: occurred_at,
            updated_at: occurred_at,
            provenance,
        }
    }

    pub fn touch(&mut self, occurred_at: DateTime<Utc>, provenance: Provenance) {
        self.updated_at = occurred_at;
        self.provenance = provenance;
    }
}

/// Ids in first-seen order with repeats dropped
pub fn distinct(ids: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(id.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_floors_at_zero() {
        let mut stock = StockInfo {
            available: 3,
            reserved: 1,
            warehouse_id: DEFAULT_WAREHOUSE.into(),
        };
        stock.confirm(2);
        assert_eq!((stock.available, stock.reserved), (1, 0));

        stock.confirm(5);
        assert_eq!((stock.available, stock.reserved), (0, 0));
    }

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        let ids = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(distinct(&ids), ["b", "a", "c"].map(String::from));
    }

    #[test]
    fn test_variant_inherits_product_currency() {
        let event = ProductVariantAdded {
            product_id: "p-1".into(),
            variant_id: "v-1".into(),
            sku: "KT-1-RED".into(),
            attributes: vec![],
            price: 10.0,
            currency: None,
            stock: 4,
        };
        let variant = ProductVariant::added(&event, "PLN");
        assert_eq!(variant.price.currency, "PLN");
        assert_eq!(variant.stock.available, 4);
        assert_eq!(variant.stock.warehouse_id, DEFAULT_WAREHOUSE);
    }

    #[test]
    fn test_product_document_shape() {
        let event = ProductCreated {
            product_id: "p-1".into(),
            vendor_id: None,
            name: "Kettle".into(),
            description: None,
            sku: "KT-1".into(),
            price: 99.5,
            discounted_price: Some(89.0),
            currency: "PLN".into(),
            categories: vec!["c-1".into(), "c-1".into()],
            initial_stock: 12,
            attributes: vec![],
            status: ProductStatus::Active,
            images: vec![],
            brand_name: None,
        };
        let product = ProductReadModel::created(&event, vec![], Utc::now(), Provenance::default());
        let document = serde_json::to_value(&product).unwrap();

        assert_eq!(document["_id"], "p-1");
        assert_eq!(document["categoryIds"], serde_json::json!(["c-1"]));
        assert_eq!(document["stock"]["available"], 12);
        assert_eq!(document["stock"]["warehouseId"], "DEFAULT");
        assert_eq!(document["status"], "ACTIVE");
        assert_eq!(product.price.current(), 89.0);
    }
}
