//! Product projection
//!
//! Category `productCount`s follow product membership. Each category lists
//! the products it has counted (`countedProductIds`), and every count change
//! is one conditional update that moves the counter and that list together.
//! After an event that can change membership, the projection compares the
//! categories a product should count towards with the ones that have counted
//! it and applies only the difference. A redelivered event therefore changes
//! nothing, and a retry finishes the moves an earlier attempt left undone.

use async_trait::async_trait;
use document_store::{Filter, Update};
use event_bus::{
    ConsumedEvent, EventHandler, EventKind, HandlerError, HandlerRegistry, Provenance, stamped,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ProjectionResult;
use crate::events::{
    ProductCreated, ProductPriceUpdated, ProductReservationConfirmed, ProductReserved,
    ProductStockUpdated, ProductUpdated, ProductVariantAdded,
};
use crate::models::{
    COUNTED_PRODUCT_IDS, ProductReadModel, ProductStatus, ProductVariant, distinct,
};
use crate::repository::{CategoryReadRepository, ProductReadRepository};

pub const PRODUCT_EVENTS: [EventKind; 9] = [
    EventKind::ProductCreated,
    EventKind::ProductUpdated,
    EventKind::ProductPriceUpdated,
    EventKind::ProductStockUpdated,
    EventKind::ProductReserved,
    EventKind::ProductReservationConfirmed,
    EventKind::ProductReservationReleased,
    EventKind::ProductVariantAdded,
    EventKind::ProductDeleted,
];

pub struct ProductProjector<P, C> {
    products: P,
    categories: C,
}

impl<P, C> ProductProjector<P, C>
where
    P: ProductReadRepository,
    C: CategoryReadRepository,
{
    pub fn new(products: P, categories: C) -> Self {
        Self {
            products,
            categories,
        }
    }

    pub async fn project(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        info!(
            event_type = %event.kind(),
            product_id = %event.envelope.aggregate_id,
            "Projecting product event"
        );

        let id = event.envelope.aggregate_id.as_str();
        match event.kind() {
            EventKind::ProductCreated => self.on_created(event, event.payload()?).await?,
            EventKind::ProductUpdated => self.on_updated(event, event.payload()?).await?,
            EventKind::ProductPriceUpdated => {
                let price: ProductPriceUpdated = event.payload()?;
                let update = stamped(event, "UpdatePrice")
                    .set("price.regular", price.price)
                    .set("price.discounted", price.discounted_price)
                    .set("price.currency", price.currency);
                self.apply(id, update).await?;
            }
            EventKind::ProductStockUpdated => {
                let stock: ProductStockUpdated = event.payload()?;
                let update = stamped(event, "UpdateStock")
                    .set("stock.available", stock.quantity)
                    .set_some("stock.warehouseId", stock.warehouse_id);
                self.apply(id, update).await?;
            }
            EventKind::ProductReserved => {
                let reserved: ProductReserved = event.payload()?;
                let update = stamped(event, "ReserveStock").inc("stock.reserved", reserved.quantity);
                self.apply(id, update).await?;
            }
            EventKind::ProductReservationConfirmed => {
                self.on_reservation_confirmed(event, event.payload()?).await?
            }
            EventKind::ProductReservationReleased => {
                let update = stamped(event, "ReleaseReservation").set("stock.reserved", 0);
                self.apply(id, update).await?;
            }
            EventKind::ProductVariantAdded => {
                self.on_variant_added(event, event.payload()?).await?
            }
            EventKind::ProductDeleted => self.on_deleted(event).await?,
            other => debug!(event_type = %other, "Not a product event"),
        }
        Ok(())
    }

    pub fn register(self, registry: &mut HandlerRegistry)
    where
        P: 'static,
        C: 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(self);
        for kind in PRODUCT_EVENTS {
            registry.register(kind, Arc::clone(&handler));
        }
    }

    /// `false` when the product is not projected; the update is then skipped.
    async fn apply(&self, id: &str, update: Update) -> ProjectionResult<bool> {
        let applied = self.products.update(Filter::by_id(id), update).await?;
        if !applied {
            warn!(product_id = id, "Product read model not found, update skipped");
        }
        Ok(applied)
    }

    /// Categories `product` counts towards: its own and their distinct
    /// parents, none once it is deleted.
    async fn counted_in(&self, product: &ProductReadModel) -> ProjectionResult<BTreeSet<String>> {
        if product.status == ProductStatus::Deleted || product.category_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let parents = self
            .categories
            .find_by_ids(&product.category_ids)
            .await?
            .into_iter()
            .filter_map(|category| category.parent_category_id);
        Ok(product.category_ids.iter().cloned().chain(parents).collect())
    }

    /// Bring category product counts in line with `product`.
    async fn reconcile_counts(
        &self,
        event: &ConsumedEvent,
        product: &ProductReadModel,
    ) -> ProjectionResult<()> {
        let wanted = self.counted_in(product).await?;
        let counted: BTreeSet<String> = self
            .categories
            .find_counting(&product.id)
            .await?
            .into_iter()
            .collect();

        for category_id in counted.difference(&wanted) {
            self.move_count(event, category_id, &product.id, false).await?;
        }
        for category_id in wanted.difference(&counted) {
            self.move_count(event, category_id, &product.id, true).await?;
        }
        debug!(
            product_id = %product.id,
            counted_in = wanted.difference(&counted).count(),
            counted_out = counted.difference(&wanted).count(),
            "Reconciled category product counts"
        );
        Ok(())
    }

    /// Count `product_id` into or out of one category. The filter makes the
    /// move a no-op when the category already reflects it.
    async fn move_count(
        &self,
        event: &ConsumedEvent,
        category_id: &str,
        product_id: &str,
        count_in: bool,
    ) -> ProjectionResult<()> {
        let update = stamped(event, "UpdateProductCount");
        let (filter, update) = if count_in {
            (
                Filter::by_id(category_id).ne(COUNTED_PRODUCT_IDS, product_id),
                update
                    .inc("productCount", 1)
                    .add_to_set(COUNTED_PRODUCT_IDS, product_id),
            )
        } else {
            (
                Filter::by_id(category_id).eq(COUNTED_PRODUCT_IDS, product_id),
                update
                    .inc("productCount", -1)
                    .pull(COUNTED_PRODUCT_IDS, product_id),
            )
        };

        if !self.categories.update_where(filter, update).await? {
            warn!(category_id, product_id, count_in, "Category not projected, product count not adjusted");
        }
        Ok(())
    }

    async fn category_names(&self, category_ids: &[String]) -> ProjectionResult<Vec<String>> {
        let categories = self.categories.find_by_ids(category_ids).await?;
        Ok(category_ids
            .iter()
            .filter_map(|id| categories.iter().find(|c| &c.id == id))
            .map(|c| c.name.clone())
            .collect())
    }

    async fn on_created(&self, event: &ConsumedEvent, created: ProductCreated) -> ProjectionResult<()> {
        let category_ids = distinct(&created.categories);
        let product = ProductReadModel::created(
            &created,
            self.category_names(&category_ids).await?,
            event.envelope.timestamp,
            Provenance::stamp(event, "CreateProduct"),
        );

        let product = if self.products.insert_if_absent(&product).await? {
            product
        } else {
            debug!(product_id = %product.id, "Product already projected, checking its counts");
            match self.products.find_by_id(&product.id).await? {
                Some(existing) => existing,
                None => return Ok(()),
            }
        };
        self.reconcile_counts(event, &product).await
    }

    async fn on_updated(&self, event: &ConsumedEvent, updated: ProductUpdated) -> ProjectionResult<()> {
        let id = updated.product_id.as_str();
        let changes = updated.changes;
        let mut update = stamped(event, "UpdateProduct")
            .set_some("name", changes.name)
            .set_some("description", changes.description)
            .set_some("images", changes.images)
            .set_some("brandName", changes.brand_name)
            .set_some("featured", changes.featured);
        if let Some(attributes) = &changes.attributes {
            update = update.set("attributes", serde_json::to_value(attributes)?);
        }

        let recategorized = changes.categories.is_some();
        if let Some(categories) = &changes.categories {
            let new_ids = distinct(categories);
            update = update
                .set("categoryNames", self.category_names(&new_ids).await?)
                .set("categoryIds", new_ids);
        }

        if !self.apply(id, update).await? || !recategorized {
            return Ok(());
        }
        match self.products.find_by_id(id).await? {
            Some(product) => self.reconcile_counts(event, &product).await,
            None => Ok(()),
        }
    }

    async fn on_reservation_confirmed(
        &self,
        event: &ConsumedEvent,
        confirmed: ProductReservationConfirmed,
    ) -> ProjectionResult<()> {
        let Some(mut product) = self.products.find_by_id(&confirmed.product_id).await? else {
            warn!(product_id = %confirmed.product_id, "Product read model not found, confirmation skipped");
            return Ok(());
        };

        product.stock.confirm(confirmed.quantity);
        product.touch(
            event.envelope.timestamp,
            Provenance::stamp(event, "ConfirmReservation"),
        );
        self.products.save(&product).await
    }

    async fn on_variant_added(
        &self,
        event: &ConsumedEvent,
        added: ProductVariantAdded,
    ) -> ProjectionResult<()> {
        let Some(product) = self.products.find_by_id(&added.product_id).await? else {
            warn!(product_id = %added.product_id, "Product read model not found, variant skipped");
            return Ok(());
        };

        let variant = ProductVariant::added(&added, &product.price.currency);
        let update = stamped(event, "AddVariant").push("variants", serde_json::to_value(&variant)?);
        // Guard on the variant id so a redelivery does not push a duplicate.
        let filter = Filter::by_id(&product.id).ne("variants.id", variant.id.clone());
        if !self.products.update(filter, update).await? {
            debug!(product_id = %product.id, variant_id = %variant.id, "Variant already projected");
        }
        Ok(())
    }

    async fn on_deleted(&self, event: &ConsumedEvent) -> ProjectionResult<()> {
        let id = event.envelope.aggregate_id.as_str();
        let Some(mut product) = self.products.find_by_id(id).await? else {
            warn!(product_id = id, "Product read model not found, deletion skipped");
            return Ok(());
        };

        let deleted = ProductStatus::Deleted.to_string();
        let filter = Filter::by_id(id).ne("status", deleted.clone());
        let update = stamped(event, "DeleteProduct").set("status", deleted);
        if !self.products.update(filter, update).await? {
            debug!(product_id = id, "Product already deleted");
        }

        product.status = ProductStatus::Deleted;
        self.reconcile_counts(event, &product).await
    }
}

#[async_trait]
impl<P, C> EventHandler for ProductProjector<P, C>
where
    P: ProductReadRepository,
    C: CategoryReadRepository,
{
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        self.project(event).await
    }

    fn name(&self) -> &str {
        "product-projection"
    }
}
