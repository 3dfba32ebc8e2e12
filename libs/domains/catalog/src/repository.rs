use async_trait::async_trait;
use document_store::{
    DocumentStore, Filter, ID_FIELD, Update, document_id, from_document, to_document,
};
use std::sync::Arc;
use tracing::instrument;

use crate::error::{ProjectionError, ProjectionResult};
use crate::models::{COUNTED_PRODUCT_IDS, CategoryReadModel, ProductReadModel};

pub const CATEGORIES: &str = "categories";
pub const PRODUCTS: &str = "products";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CategoryReadRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<CategoryReadModel>>;

    /// Categories among `ids` that exist; missing ids are skipped.
    async fn find_by_ids(&self, ids: &[String]) -> ProjectionResult<Vec<CategoryReadModel>>;

    /// `true` when the document was created by this call
    async fn insert_if_absent(&self, category: &CategoryReadModel) -> ProjectionResult<bool>;

    /// Apply a field-level update; `false` when no such category exists.
    async fn update(&self, id: &str, update: Update) -> ProjectionResult<bool>;

    /// Apply `update` to the category matching `filter`; `false` when none does.
    async fn update_where(&self, filter: Filter, update: Update) -> ProjectionResult<bool>;

    /// Ids of the categories whose product count includes `product_id`
    async fn find_counting(&self, product_id: &str) -> ProjectionResult<Vec<String>>;

    /// Apply `update` to every direct child of `parent_id`; returns how many matched.
    async fn update_children(&self, parent_id: &str, update: Update) -> ProjectionResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductReadRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<ProductReadModel>>;

    async fn insert_if_absent(&self, product: &ProductReadModel) -> ProjectionResult<bool>;

    async fn save(&self, product: &ProductReadModel) -> ProjectionResult<()>;

    /// Apply `update` to the product matching `filter`; `false` when none does.
    async fn update(&self, filter: Filter, update: Update) -> ProjectionResult<bool>;
}

/// Catalog repositories over any [`DocumentStore`]
#[derive(Clone)]
pub struct StoreCatalogRepository {
    store: Arc<dyn DocumentStore>,
}

impl StoreCatalogRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CategoryReadRepository for StoreCatalogRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<CategoryReadModel>> {
        match self.store.find_by_id(CATEGORIES, id).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_ids(&self, ids: &[String]) -> ProjectionResult<Vec<CategoryReadModel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::new().is_in(ID_FIELD, ids.iter().cloned());
        self.store
            .find_by_filter(CATEGORIES, &filter)
            .await?
            .into_iter()
            .map(|document| from_document(document).map_err(ProjectionError::from))
            .collect()
    }

    #[instrument(skip(self, category), fields(category_id = %category.id))]
    async fn insert_if_absent(&self, category: &CategoryReadModel) -> ProjectionResult<bool> {
        Ok(self
            .store
            .insert_if_absent(CATEGORIES, to_document(category)?)
            .await?)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: &str, update: Update) -> ProjectionResult<bool> {
        let result = self
            .store
            .update_first(CATEGORIES, &Filter::by_id(id), &update)
            .await?;
        Ok(result.matched > 0)
    }

    #[instrument(skip(self, filter, update))]
    async fn update_where(&self, filter: Filter, update: Update) -> ProjectionResult<bool> {
        let result = self.store.update_first(CATEGORIES, &filter, &update).await?;
        Ok(result.matched > 0)
    }

    #[instrument(skip(self))]
    async fn find_counting(&self, product_id: &str) -> ProjectionResult<Vec<String>> {
        let filter = Filter::new().eq(COUNTED_PRODUCT_IDS, product_id);
        Ok(self
            .store
            .find_by_filter(CATEGORIES, &filter)
            .await?
            .iter()
            .filter_map(|document| document_id(document).map(String::from))
            .collect())
    }

    #[instrument(skip(self, update))]
    async fn update_children(&self, parent_id: &str, update: Update) -> ProjectionResult<u64> {
        let filter = Filter::new().eq("parentCategoryId", parent_id);
        let result = self
            .store
            .update_multi(CATEGORIES, &filter, &update)
            .await?;
        Ok(result.matched)
    }
}

#[async_trait]
impl ProductReadRepository for StoreCatalogRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<ProductReadModel>> {
        match self.store.find_by_id(PRODUCTS, id).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn insert_if_absent(&self, product: &ProductReadModel) -> ProjectionResult<bool> {
        Ok(self
            .store
            .insert_if_absent(PRODUCTS, to_document(product)?)
            .await?)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn save(&self, product: &ProductReadModel) -> ProjectionResult<()> {
        Ok(self.store.upsert(PRODUCTS, to_document(product)?).await?)
    }

    #[instrument(skip(self, filter, update))]
    async fn update(&self, filter: Filter, update: Update) -> ProjectionResult<bool> {
        let result = self.store.update_first(PRODUCTS, &filter, &update).await?;
        Ok(result.matched > 0)
    }
}
