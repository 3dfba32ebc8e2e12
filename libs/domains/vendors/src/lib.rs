//! Vendor read model
//!
//! Consumes the vendor event stream and maintains one document per vendor in
//! the `vendors` collection.
//!
//! ```text
//! vendor.*.event ──► VendorProjector ──► VendorReadRepository ──► DocumentStore
//! ```
//!
//! Like every other projection, writes are stamped with the provenance of
//! the hop that made them and `updatedAt` set to the event time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use document_store::InMemoryDocumentStore;
//! use domain_vendors::{StoreVendorRepository, VendorProjector};
//! use event_bus::HandlerRegistry;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let mut registry = HandlerRegistry::new();
//! VendorProjector::new(StoreVendorRepository::new(store)).register(&mut registry);
//! ```

pub mod error;
pub mod events;
pub mod models;
pub mod projector;
pub mod repository;

pub use error::{ProjectionError, ProjectionResult};
pub use events::*;
pub use models::{BankDetails, CategoryAssignment, VendorReadModel, VendorStatus};
pub use projector::{VENDOR_EVENTS, VendorProjector};
pub use repository::{StoreVendorRepository, VENDORS, VendorReadRepository};
