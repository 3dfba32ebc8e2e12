use async_trait::async_trait;
use document_store::{DocumentStore, Filter, Update, from_document, to_document};
use std::sync::Arc;
use tracing::instrument;

use crate::error::ProjectionResult;
use crate::models::CustomerReadModel;

pub const CUSTOMERS: &str = "customers";

/// Persistence of the customer read model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustomerReadRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<CustomerReadModel>>;

    /// `true` when the document was created by this call
    async fn insert_if_absent(&self, customer: &CustomerReadModel) -> ProjectionResult<bool>;

    /// Replace the whole document
    async fn save(&self, customer: &CustomerReadModel) -> ProjectionResult<()>;

    /// Apply a field-level update; `false` when no such customer exists.
    async fn update(&self, id: &str, update: Update) -> ProjectionResult<bool>;
}

/// [`CustomerReadRepository`] over any [`DocumentStore`]
#[derive(Clone)]
pub struct StoreCustomerRepository {
    store: Arc<dyn DocumentStore>,
}

impl StoreCustomerRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CustomerReadRepository for StoreCustomerRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> ProjectionResult<Option<CustomerReadModel>> {
        match self.store.find_by_id(CUSTOMERS, id).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id))]
    async fn insert_if_absent(&self, customer: &CustomerReadModel) -> ProjectionResult<bool> {
        Ok(self
            .store
            .insert_if_absent(CUSTOMERS, to_document(customer)?)
            .await?)
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id))]
    async fn save(&self, customer: &CustomerReadModel) -> ProjectionResult<()> {
        Ok(self.store.upsert(CUSTOMERS, to_document(customer)?).await?)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: &str, update: Update) -> ProjectionResult<bool> {
        let result = self
            .store
            .update_first(CUSTOMERS, &Filter::by_id(id), &update)
            .await?;
        Ok(result.matched > 0)
    }
}
