//! Document store for read models
//!
//! [`DocumentStore`] is the collaborator the projections write through:
//! lookups by id or [`Filter`], insert-if-absent for idempotent creation,
//! whole-document upsert, and field-level [`Update`]s (set, increment, array
//! operators) that stay safe under concurrent writers without locking.
//!
//! Two backends: [`InMemoryDocumentStore`] for tests and single-node runs,
//! [`MongoDocumentStore`] for deployments.

pub mod error;
pub mod memory;
pub mod model;
pub mod mongo;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDocumentStore;
pub use model::{
    Document, Filter, ID_FIELD, Update, UpdateResult, document_id, from_document, to_document,
};
pub use mongo::MongoDocumentStore;
pub use store::DocumentStore;
