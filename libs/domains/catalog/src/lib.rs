//! Catalog read models: categories and products
//!
//! Two projections share one store:
//!
//! - [`CategoryProjector`] maintains the category tree (`categories`)
//! - [`ProductProjector`] maintains products (`products`) and the
//!   `productCount` of every category a product belongs to
//!
//! Both stamp provenance on each write, like the customer projection.

pub mod category;
pub mod error;
pub mod events;
pub mod models;
pub mod product;
pub mod repository;

#[cfg(test)]
mod test_support;

pub use category::{CATEGORY_EVENTS, CategoryProjector};
pub use error::{ProjectionError, ProjectionResult};
pub use events::*;
pub use models::{
    CategoryReadModel, PriceInfo, ProductAttribute, ProductReadModel, ProductStatus,
    ProductVariant, StockInfo, SubcategoryRef,
};
pub use product::{PRODUCT_EVENTS, ProductProjector};
pub use repository::{
    CATEGORIES, CategoryReadRepository, PRODUCTS, ProductReadRepository, StoreCatalogRepository,
};

use event_bus::HandlerRegistry;

/// Register both catalog projections over one repository.
pub fn register_projections(repository: StoreCatalogRepository, registry: &mut HandlerRegistry) {
    CategoryProjector::new(repository.clone()).register(registry);
    ProductProjector::new(repository.clone(), repository).register(registry);
}
