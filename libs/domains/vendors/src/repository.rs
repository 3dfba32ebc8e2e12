use async_trait::async_trait;
use document_store::{DocumentStore, Filter, Update, from_document, to_document};
use std::sync::Arc;
use tracing::instrument;

use crate::error::ProjectionResult;
use crate::models::VendorReadModel;

pub const VENDORS: &str = "vendors";

/// Persistence of the vendor read model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VendorReadRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<VendorReadModel>>;

    /// `true` when the document was created by this call
    async fn insert_if_absent(&self, vendor: &VendorReadModel) -> ProjectionResult<bool>;

    async fn save(&self, vendor: &VendorReadModel) -> ProjectionResult<()>;

    /// Apply `update` to the first vendor matching `filter`; `false` when none did.
    async fn update_where(&self, filter: Filter, update: Update) -> ProjectionResult<bool>;
}

/// [`VendorReadRepository`] over any [`DocumentStore`]
#[derive(Clone)]
pub struct StoreVendorRepository {
    store: Arc<dyn DocumentStore>,
}

impl StoreVendorRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VendorReadRepository for StoreVendorRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<VendorReadModel>> {
        match self.store.find_by_id(VENDORS, id).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, vendor), fields(vendor_id = %vendor.id))]
    async fn insert_if_absent(&self, vendor: &VendorReadModel) -> ProjectionResult<bool> {
        Ok(self
            .store
            .insert_if_absent(VENDORS, to_document(vendor)?)
            .await?)
    }

    #[instrument(skip(self, vendor), fields(vendor_id = %vendor.id))]
    async fn save(&self, vendor: &VendorReadModel) -> ProjectionResult<()> {
        Ok(self.store.upsert(VENDORS, to_document(vendor)?).await?)
    }

    #[instrument(skip(self, filter, update))]
    async fn update_where(&self, filter: Filter, update: Update) -> ProjectionResult<bool> {
        let result = self.store.update_first(VENDORS, &filter, &update).await?;
        Ok(result.matched > 0)
    }
}
