//! MongoDB implementation of [`DocumentStore`]

use async_trait::async_trait;
use core_config::mongodb::MongoConfig;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::model::{Clause, Document, Filter, ID_FIELD, Update, UpdateOp, UpdateResult, document_id};
use crate::store::DocumentStore;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoDocumentStore {
    database: Database,
}

impl MongoDocumentStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connect and verify the deployment answers before returning.
    pub async fn connect(config: &MongoConfig) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some("read-model-projector".to_string());
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(30));

        let client = Client::with_options(options)?;
        let store = Self::new(client.database(&config.database));
        store.ping().await?;

        info!(database = %config.database, "Connected to MongoDB");
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.database.collection(name)
    }
}

fn to_bson_document(document: &Document) -> StoreResult<bson::Document> {
    Ok(bson::to_document(document)?)
}

fn from_bson_document(document: bson::Document) -> StoreResult<Document> {
    Ok(bson::from_document(document)?)
}

fn to_bson_value(value: &serde_json::Value) -> StoreResult<Bson> {
    Ok(bson::to_bson(value)?)
}

/// Translate a [`Filter`] into a query document.
pub fn filter_document(filter: &Filter) -> StoreResult<bson::Document> {
    let mut clauses = Vec::with_capacity(filter.clauses().len());
    for clause in filter.clauses() {
        clauses.push(match clause {
            Clause::Eq(path, value) => doc! { path: to_bson_value(value)? },
            Clause::Ne(path, value) => doc! { path: { "$ne": to_bson_value(value)? } },
            Clause::In(path, values) => {
                let values = values.iter().map(to_bson_value).collect::<StoreResult<Vec<_>>>()?;
                doc! { path: { "$in": values } }
            }
        });
    }

    Ok(match clauses.len() {
        0 => doc! {},
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses },
    })
}

/// Translate an [`Update`] into an update document grouped by operator.
pub fn update_document(update: &Update) -> StoreResult<bson::Document> {
    let mut grouped = bson::Document::new();
    for op in update.ops() {
        let (operator, value) = match op {
            UpdateOp::Set(_, value) => ("$set", to_bson_value(value)?),
            UpdateOp::Unset(_) => ("$unset", Bson::String(String::new())),
            UpdateOp::Inc(_, delta) => ("$inc", Bson::Int64(*delta)),
            UpdateOp::Push(_, value) => ("$push", to_bson_value(value)?),
            UpdateOp::Pull(_, value) => ("$pull", to_bson_value(value)?),
            UpdateOp::AddToSet(_, value) => ("$addToSet", to_bson_value(value)?),
        };

        match grouped.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(op.path(), value);
            }
            _ => {
                grouped.insert(operator, doc! { op.path(): value });
            }
        }
    }
    Ok(grouped)
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    #[instrument(skip(self))]
    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.collection(collection)
            .find_one(doc! { ID_FIELD: id })
            .await?
            .map(from_bson_document)
            .transpose()
    }

    #[instrument(skip(self, filter))]
    async fn find_by_filter(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(filter_document(filter)?)
            .await?;
        let documents: Vec<bson::Document> = cursor.try_collect().await?;
        documents.into_iter().map(from_bson_document).collect()
    }

    #[instrument(skip(self, document), fields(id = document_id(&document)))]
    async fn insert_if_absent(&self, collection: &str, document: Document) -> StoreResult<bool> {
        if document_id(&document).is_none() {
            return Err(StoreError::MissingId);
        }
        match self
            .collection(collection)
            .insert_one(to_bson_document(&document)?)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, document), fields(id = document_id(&document)))]
    async fn upsert(&self, collection: &str, document: Document) -> StoreResult<()> {
        let id = document_id(&document).ok_or(StoreError::MissingId)?;
        self.collection(collection)
            .replace_one(doc! { ID_FIELD: id }, to_bson_document(&document)?)
            .upsert(true)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, filter, update))]
    async fn update_first(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        let result = self
            .collection(collection)
            .update_one(filter_document(filter)?, update_document(update)?)
            .await?;
        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    #[instrument(skip(self, filter, update))]
    async fn update_multi(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        let result = self
            .collection(collection)
            .update_many(filter_document(filter)?, update_document(update)?)
            .await?;
        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
