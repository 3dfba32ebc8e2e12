//! In-process store for tests and single-node runs

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{Document, Filter, Update, UpdateResult, document_id};
use crate::store::DocumentStore;

type Collection = BTreeMap<String, Document>;

/// Collections of documents keyed by `_id`, behind one lock
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> StoreResult<UpdateResult> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let mut result = UpdateResult::default();
        for document in documents.values_mut().filter(|d| filter.matches(d)) {
            // Apply to a copy so a failing operation leaves the document untouched.
            let mut updated = document.clone();
            update.apply(&mut updated)?;

            result.matched += 1;
            if updated != *document {
                result.modified += 1;
                *document = updated;
            }
            if !multi {
                break;
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn find_by_filter(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_if_absent(&self, collection: &str, document: Document) -> StoreResult<bool> {
        let id = document_id(&document).ok_or(StoreError::MissingId)?.to_string();
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.contains_key(&id) {
            return Ok(false);
        }
        documents.insert(id, document);
        Ok(true)
    }

    async fn upsert(&self, collection: &str, document: Document) -> StoreResult<()> {
        let id = document_id(&document).ok_or(StoreError::MissingId)?.to_string();
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }

    async fn update_first(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        self.update(collection, filter, update, false).await
    }

    async fn update_multi(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        self.update(collection, filter, update, true).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
