//! Applies customer events to the customer read model
//!
//! Creation is insert-if-absent, so a redelivered registration never resets a
//! document that later events already advanced. Flat field changes are
//! partial updates; address and preference changes depend on the current
//! list contents and go through read-modify-write, which is safe because all
//! events of one customer arrive in order on one partition.

use async_trait::async_trait;
use document_store::Update;
use event_bus::{
    ConsumedEvent, EventHandler, EventKind, HandlerError, HandlerRegistry, Provenance, stamped,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ProjectionResult;
use crate::events::{
    CustomerAddressAdded, CustomerAddressRemoved, CustomerAddressUpdated, CustomerEmailChanged,
    CustomerPreferencesUpdated, CustomerRegistered, CustomerUpdated,
};
use crate::models::{Address, CustomerReadModel, CustomerStatus};
use crate::repository::CustomerReadRepository;

/// Event kinds this projection consumes
pub const CUSTOMER_EVENTS: [EventKind; 11] = [
    EventKind::CustomerRegistered,
    EventKind::CustomerUpdated,
    EventKind::CustomerEmailChanged,
    EventKind::CustomerEmailVerified,
    EventKind::CustomerAddressAdded,
    EventKind::CustomerAddressUpdated,
    EventKind::CustomerAddressRemoved,
    EventKind::CustomerPreferencesUpdated,
    EventKind::CustomerDeactivated,
    EventKind::CustomerReactivated,
    EventKind::CustomerDeleted,
];

pub struct CustomerProjector<R> {
    repository: R,
}

impl<R: CustomerReadRepository> CustomerProjector<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Apply one event. Kinds outside [`CUSTOMER_EVENTS`] are ignored.
    pub async fn project(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        info!(
            event_type = %event.kind(),
            customer_id = %event.envelope.aggregate_id,
            "Projecting customer event"
        );

        let id = event.envelope.aggregate_id.as_str();
        match event.kind() {
            EventKind::CustomerRegistered => self.on_registered(event, event.payload()?).await?,
            EventKind::CustomerUpdated => self.on_updated(event, event.payload()?).await?,
            EventKind::CustomerEmailChanged => {
                self.on_email_changed(event, event.payload()?).await?
            }
            EventKind::CustomerEmailVerified => {
                let update = stamped(event, "VerifyEmail").set("emailVerified", true);
                self.apply(id, update).await?
            }
            EventKind::CustomerAddressAdded => {
                self.on_address_added(event, event.payload()?).await?
            }
            EventKind::CustomerAddressUpdated => {
                self.on_address_updated(event, event.payload()?).await?
            }
            EventKind::CustomerAddressRemoved => {
                self.on_address_removed(event, event.payload()?).await?
            }
            EventKind::CustomerPreferencesUpdated => {
                self.on_preferences_updated(event, event.payload()?).await?
            }
            EventKind::CustomerDeactivated => {
                self.set_status(event, CustomerStatus::Inactive, "DeactivateCustomer")
                    .await?
            }
            EventKind::CustomerReactivated => {
                self.set_status(event, CustomerStatus::Active, "ReactivateCustomer")
                    .await?
            }
            EventKind::CustomerDeleted => {
                self.set_status(event, CustomerStatus::Deleted, "DeleteCustomer")
                    .await?
            }
            other => debug!(event_type = %other, "Not a customer event"),
        }
        Ok(())
    }

    /// Register this projection for every customer event kind.
    pub fn register(self, registry: &mut HandlerRegistry)
    where
        R: 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(self);
        for kind in CUSTOMER_EVENTS {
            registry.register(kind, Arc::clone(&handler));
        }
    }

    async fn apply(&self, id: &str, update: Update) -> ProjectionResult<()> {
        if !self.repository.update(id, update).await? {
            warn!(customer_id = id, "Customer read model not found, update skipped");
        }
        Ok(())
    }

    async fn on_registered(
        &self,
        event: &ConsumedEvent,
        registered: CustomerRegistered,
    ) -> ProjectionResult<()> {
        let customer = CustomerReadModel::registered(
            &registered,
            event.envelope.timestamp,
            Provenance::stamp(event, "CreateCustomer"),
        );
        if self.repository.insert_if_absent(&customer).await? {
            debug!(customer_id = %customer.id, "Customer read model created");
        } else {
            debug!(customer_id = %customer.id, "Customer already projected, registration ignored");
        }
        Ok(())
    }

    async fn on_updated(&self, event: &ConsumedEvent, updated: CustomerUpdated) -> ProjectionResult<()> {
        let changes = updated.changes;
        let update = stamped(event, "UpdateCustomer")
            .set_some("firstName", changes.first_name.clone())
            .set_some("personalData.firstName", changes.first_name)
            .set_some("lastName", changes.last_name.clone())
            .set_some("personalData.lastName", changes.last_name)
            .set_some("phoneNumber", changes.phone_number.clone())
            .set_some("personalData.phoneNumber", changes.phone_number)
            .set_some("phoneVerified", changes.phone_verified);
        self.apply(&updated.customer_id, update).await
    }

    async fn on_email_changed(
        &self,
        event: &ConsumedEvent,
        changed: CustomerEmailChanged,
    ) -> ProjectionResult<()> {
        let update = stamped(event, "ChangeEmail")
            .set("email", changed.new_email.clone())
            .set("personalData.email", changed.new_email)
            .set("emailVerified", false);
        self.apply(&changed.customer_id, update).await
    }

    /// Load, change and save the whole document.
    async fn modify(
        &self,
        event: &ConsumedEvent,
        operation: &str,
        change: impl FnOnce(&mut CustomerReadModel),
    ) -> ProjectionResult<()> {
        let id = &event.envelope.aggregate_id;
        let Some(mut customer) = self.repository.find_by_id(id).await? else {
            warn!(customer_id = %id, operation, "Customer read model not found, change skipped");
            return Ok(());
        };

        change(&mut customer);
        customer.touch(event.envelope.timestamp, Provenance::stamp(event, operation));
        self.repository.save(&customer).await
    }

    async fn on_address_added(
        &self,
        event: &ConsumedEvent,
        added: CustomerAddressAdded,
    ) -> ProjectionResult<()> {
        let address = Address::from(&added);
        self.modify(event, "AddAddress", |customer| customer.add_address(address))
            .await
    }

    async fn on_address_updated(
        &self,
        event: &ConsumedEvent,
        updated: CustomerAddressUpdated,
    ) -> ProjectionResult<()> {
        self.modify(event, "UpdateAddress", |customer| {
            if !customer.update_address(&updated) {
                warn!(address_id = %updated.address_id, "Address not found on customer");
            }
        })
        .await
    }

    async fn on_address_removed(
        &self,
        event: &ConsumedEvent,
        removed: CustomerAddressRemoved,
    ) -> ProjectionResult<()> {
        self.modify(event, "RemoveAddress", |customer| {
            customer.remove_address(&removed.address_id);
        })
        .await
    }

    async fn on_preferences_updated(
        &self,
        event: &ConsumedEvent,
        updated: CustomerPreferencesUpdated,
    ) -> ProjectionResult<()> {
        self.modify(event, "UpdatePreferences", |customer| {
            customer.preferences = updated.preferences;
        })
        .await
    }

    async fn set_status(
        &self,
        event: &ConsumedEvent,
        status: CustomerStatus,
        operation: &str,
    ) -> ProjectionResult<()> {
        let update = stamped(event, operation).set("status", status.to_string());
        self.apply(&event.envelope.aggregate_id, update).await
    }
}

#[async_trait]
impl<R: CustomerReadRepository> EventHandler for CustomerProjector<R> {
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        self.project(event).await
    }

    fn name(&self) -> &str {
        "customer-projection"
    }
}
