//! Customer read model
//!
//! Consumes the customer event stream and maintains one denormalized
//! document per customer in the `customers` collection.
//!
//! ```text
//! customer.*.event ──► CustomerProjector ──► CustomerReadRepository ──► DocumentStore
//! ```
//!
//! Every write carries the provenance of the hop that made it
//! (`lastTraceId`, `lastSpanId`, `lastOperation`, `lastUpdatedAt`) and
//! `updatedAt` set to the event time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use document_store::InMemoryDocumentStore;
//! use domain_customers::{CustomerProjector, StoreCustomerRepository};
//! use event_bus::HandlerRegistry;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let mut registry = HandlerRegistry::new();
//! CustomerProjector::new(StoreCustomerRepository::new(store)).register(&mut registry);
//! ```

pub mod error;
pub mod events;
pub mod models;
pub mod projector;
pub mod repository;

pub use error::{ProjectionError, ProjectionResult};
pub use events::*;
pub use models::{Address, AddressType, CustomerPreferences, CustomerReadModel, CustomerStatus, PersonalData};
pub use projector::{CUSTOMER_EVENTS, CustomerProjector};
pub use repository::{CUSTOMERS, CustomerReadRepository, StoreCustomerRepository};
