use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{Document, Filter, Update, UpdateResult};

/// Document-store collaborator used by the projections
///
/// Every write is atomic per document. Concurrent writers to the same id are
/// safe as long as they express their change as field-level updates
/// (`set`, `inc`, array operators) rather than whole-document replacement.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn find_by_filter(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Insert `document` unless one with the same `_id` exists.
    ///
    /// Returns `true` when this call inserted it.
    async fn insert_if_absent(&self, collection: &str, document: Document) -> StoreResult<bool>;

    /// Replace the document with the same `_id`, inserting it if missing.
    async fn upsert(&self, collection: &str, document: Document) -> StoreResult<()>;

    async fn update_first(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult>;

    async fn update_multi(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult>;

    /// Atomically add `delta` to a numeric field. `false` if no such document.
    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> StoreResult<bool> {
        let result = self
            .update_first(collection, &Filter::by_id(id), &Update::new().inc(field, delta))
            .await?;
        Ok(result.matched > 0)
    }

    async fn ping(&self) -> StoreResult<()>;
}
