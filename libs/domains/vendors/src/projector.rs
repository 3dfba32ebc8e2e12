//! Applies vendor events to the vendor read model
//!
//! Registration is insert-if-absent. Status, verification and bank details
//! are partial updates. Category assignments depend on the current list and
//! go through read-modify-write; all events of one vendor arrive in order on
//! one partition.

use async_trait::async_trait;
use document_store::{Filter, Update};
use event_bus::{
    ConsumedEvent, EventHandler, EventKind, HandlerError, HandlerRegistry, Provenance, stamped,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ProjectionResult;
use crate::events::{
    VendorBankDetailsUpdated, VendorCategoryAssigned, VendorCategoryRemoved, VendorRegistered,
    VendorStatusChanged, VendorUpdated, VendorVerificationCompleted,
};
use crate::models::{BankDetails, CategoryAssignment, VendorReadModel, VendorStatus};
use crate::repository::VendorReadRepository;

/// Event kinds this projection consumes
pub const VENDOR_EVENTS: [EventKind; 8] = [
    EventKind::VendorRegistered,
    EventKind::VendorUpdated,
    EventKind::VendorVerificationCompleted,
    EventKind::VendorStatusChanged,
    EventKind::VendorCategoryAssigned,
    EventKind::VendorCategoryRemoved,
    EventKind::VendorBankDetailsUpdated,
    EventKind::VendorDeleted,
];

pub struct VendorProjector<R> {
    repository: R,
}

impl<R: VendorReadRepository> VendorProjector<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Apply one event. Kinds outside [`VENDOR_EVENTS`] are ignored.
    pub async fn project(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        info!(
            event_type = %event.kind(),
            vendor_id = %event.envelope.aggregate_id,
            "Projecting vendor event"
        );

        match event.kind() {
            EventKind::VendorRegistered => self.on_registered(event, event.payload()?).await?,
            EventKind::VendorUpdated => self.on_updated(event, event.payload()?).await?,
            EventKind::VendorVerificationCompleted => {
                self.on_verification_completed(event, event.payload()?).await?
            }
            EventKind::VendorStatusChanged => {
                let changed: VendorStatusChanged = event.payload()?;
                self.set_status(event, changed.new_status, "ChangeVendorStatus")
                    .await?
            }
            EventKind::VendorCategoryAssigned => {
                self.on_category_assigned(event, event.payload()?).await?
            }
            EventKind::VendorCategoryRemoved => {
                self.on_category_removed(event, event.payload()?).await?
            }
            EventKind::VendorBankDetailsUpdated => {
                self.on_bank_details_updated(event, event.payload()?).await?
            }
            EventKind::VendorDeleted => {
                self.set_status(event, VendorStatus::Deleted, "DeleteVendor")
                    .await?
            }
            other => debug!(event_type = %other, "Not a vendor event"),
        }
        Ok(())
    }

    /// Register this projection for every vendor event kind.
    pub fn register(self, registry: &mut HandlerRegistry)
    where
        R: 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(self);
        for kind in VENDOR_EVENTS {
            registry.register(kind, Arc::clone(&handler));
        }
    }

    async fn apply(&self, id: &str, update: Update) -> ProjectionResult<()> {
        if !self.repository.update_where(Filter::by_id(id), update).await? {
            warn!(vendor_id = id, "Vendor read model not found, update skipped");
        }
        Ok(())
    }

    async fn on_registered(
        &self,
        event: &ConsumedEvent,
        registered: VendorRegistered,
    ) -> ProjectionResult<()> {
        let vendor = VendorReadModel::registered(
            &registered,
            event.envelope.timestamp,
            Provenance::stamp(event, "RegisterVendor"),
        );
        if self.repository.insert_if_absent(&vendor).await? {
            debug!(vendor_id = %vendor.id, "Vendor read model created");
        } else {
            debug!(vendor_id = %vendor.id, "Vendor already projected, registration ignored");
        }
        Ok(())
    }

    async fn on_updated(&self, event: &ConsumedEvent, updated: VendorUpdated) -> ProjectionResult<()> {
        let changes = updated.changes;
        let update = stamped(event, "UpdateVendor")
            .set_some("name", changes.name)
            .set_some("businessName", changes.business_name)
            .set_some("phone", changes.phone)
            .set_some("contactPersonName", changes.contact_person_name)
            .set_some("contactPersonEmail", changes.contact_person_email);
        self.apply(&updated.vendor_id, update).await
    }

    /// An approval activates a vendor still waiting on it; any other status
    /// is left as the write side last reported it.
    async fn on_verification_completed(
        &self,
        event: &ConsumedEvent,
        completed: VendorVerificationCompleted,
    ) -> ProjectionResult<()> {
        let approved = completed.verification_status == VendorStatus::Approved;
        let update = stamped(event, "VerifyVendor").set("verified", approved);

        if approved {
            let pending = Filter::by_id(&completed.vendor_id)
                .eq("status", VendorStatus::Pending.to_string());
            let activate = update.clone().set("status", VendorStatus::Active.to_string());
            if self.repository.update_where(pending, activate).await? {
                debug!(vendor_id = %completed.vendor_id, "Verified vendor activated");
                return Ok(());
            }
        }
        self.apply(&completed.vendor_id, update).await
    }

    async fn on_bank_details_updated(
        &self,
        event: &ConsumedEvent,
        updated: VendorBankDetailsUpdated,
    ) -> ProjectionResult<()> {
        let details = BankDetails {
            account_number: updated.bank_account_number,
            bank_name: updated.bank_name,
            swift_code: updated.bank_swift_code,
        };
        let update = stamped(event, "UpdateBankDetails")
            .set("bankDetails", serde_json::to_value(details)?);
        self.apply(&updated.vendor_id, update).await
    }

    async fn modify(
        &self,
        event: &ConsumedEvent,
        operation: &str,
        change: impl FnOnce(&mut VendorReadModel),
    ) -> ProjectionResult<()> {
        let id = &event.envelope.aggregate_id;
        let Some(mut vendor) = self.repository.find_by_id(id).await? else {
            warn!(vendor_id = %id, operation, "Vendor read model not found, change skipped");
            return Ok(());
        };

        change(&mut vendor);
        vendor.touch(event.envelope.timestamp, Provenance::stamp(event, operation));
        self.repository.save(&vendor).await
    }

    async fn on_category_assigned(
        &self,
        event: &ConsumedEvent,
        assigned: VendorCategoryAssigned,
    ) -> ProjectionResult<()> {
        let assignment = CategoryAssignment {
            category_id: assigned.category_id,
            category_name: assigned.category_name,
            assigned_at: event.envelope.timestamp,
        };
        self.modify(event, "AssignCategory", |vendor| vendor.assign_category(assignment))
            .await
    }

    async fn on_category_removed(
        &self,
        event: &ConsumedEvent,
        removed: VendorCategoryRemoved,
    ) -> ProjectionResult<()> {
        self.modify(event, "RemoveCategory", |vendor| {
            if !vendor.remove_category(&removed.category_id) {
                debug!(category_id = %removed.category_id, "Category was not assigned");
            }
        })
        .await
    }

    async fn set_status(
        &self,
        event: &ConsumedEvent,
        status: VendorStatus,
        operation: &str,
    ) -> ProjectionResult<()> {
        let update = stamped(event, operation).set("status", status.to_string());
        self.apply(&event.envelope.aggregate_id, update).await
    }
}

#[async_trait]
impl<R: VendorReadRepository> EventHandler for VendorProjector<R> {
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        self.project(event).await
    }

    fn name(&self) -> &str {
        "vendor-projection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProjectionError;
    use crate::events::VendorDeleted;
    use crate::repository::MockVendorReadRepository;
    use document_store::StoreError;
    use document_store::model::{Clause, UpdateOp};
    use event_bus::{ConsumerRecord, DomainEvent, ErrorClass, EventEnvelope, TraceContext};
    use serde_json::Value;

    fn consumed<E: DomainEvent>(event: &E) -> ConsumedEvent {
        let envelope = EventEnvelope::from_event(event).unwrap();
        let record = ConsumerRecord {
            topic: event.topic().unwrap().to_string(),
            partition: 0,
            offset: "0".into(),
            key: Some(event.aggregate_id()),
            headers: Default::default(),
            value: envelope.encode().unwrap(),
        };
        let context = TraceContext::new_root("vendor-read", "consume");
        ConsumedEvent::new(envelope, &record, context)
    }

    fn sets(update: &Update, path: &str) -> Option<Value> {
        update.ops().iter().find_map(|op| match op {
            UpdateOp::Set(p, value) if p == path => Some(value.clone()),
            _ => None,
        })
    }

    fn requires_pending(filter: &Filter) -> bool {
        filter.clauses().iter().any(|clause| {
            matches!(clause, Clause::Eq(path, value) if path == "status" && value == "PENDING")
        })
    }

    fn registered() -> VendorRegistered {
        VendorRegistered {
            vendor_id: "v-1".into(),
            name: "Acme".into(),
            email: "shop@acme.pl".into(),
            status: VendorStatus::Pending,
            business_name: None,
            tax_id: None,
            phone: None,
            legal_form: None,
            commission_rate: Some(10.0),
            initial_categories: vec!["garden".into()],
        }
    }

    fn verification(status: VendorStatus) -> ConsumedEvent {
        consumed(&VendorVerificationCompleted {
            vendor_id: "v-1".into(),
            verification_status: status,
            verification_timestamp: None,
        })
    }

    #[tokio::test]
    async fn test_registration_inserts_pending_vendor() {
        let mut repository = MockVendorReadRepository::new();
        repository
            .expect_insert_if_absent()
            .withf(|vendor| {
                vendor.id == "v-1"
                    && vendor.status == VendorStatus::Pending
                    && vendor.categories.len() == 1
                    && vendor.provenance.last_operation.as_deref() == Some("RegisterVendor")
            })
            .times(1)
            .returning(|_| Ok(true));

        let projector = VendorProjector::new(repository);
        projector.project(&consumed(&registered())).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_not_an_error() {
        let mut repository = MockVendorReadRepository::new();
        repository.expect_insert_if_absent().returning(|_| Ok(false));
        repository.expect_save().never();

        let projector = VendorProjector::new(repository);
        projector.project(&consumed(&registered())).await.unwrap();
    }

    #[tokio::test]
    async fn test_approval_activates_pending_vendor() {
        let mut repository = MockVendorReadRepository::new();
        repository
            .expect_update_where()
            .withf(|filter, update| {
                requires_pending(filter)
                    && sets(update, "status") == Some(Value::from("ACTIVE"))
                    && sets(update, "verified") == Some(Value::from(true))
                    && sets(update, "lastOperation") == Some(Value::from("VerifyVendor"))
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let projector = VendorProjector::new(repository);
        projector
            .project(&verification(VendorStatus::Approved))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_approval_of_active_vendor_only_marks_verified() {
        let mut repository = MockVendorReadRepository::new();
        let mut seq = mockall::Sequence::new();
        repository
            .expect_update_where()
            .withf(|filter, _| requires_pending(filter))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(false));
        repository
            .expect_update_where()
            .withf(|filter, update| {
                !requires_pending(filter)
                    && sets(update, "status").is_none()
                    && sets(update, "verified") == Some(Value::from(true))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let projector = VendorProjector::new(repository);
        projector
            .project(&verification(VendorStatus::Approved))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejection_leaves_status_alone() {
        let mut repository = MockVendorReadRepository::new();
        repository
            .expect_update_where()
            .withf(|filter, update| {
                !requires_pending(filter)
                    && sets(update, "status").is_none()
                    && sets(update, "verified") == Some(Value::from(false))
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let projector = VendorProjector::new(repository);
        projector
            .project(&verification(VendorStatus::Rejected))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bank_details_replace_the_whole_object() {
        let mut repository = MockVendorReadRepository::new();
        repository
            .expect_update_where()
            .withf(|_, update| {
                sets(update, "bankDetails")
                    == Some(serde_json::json!({
                        "accountNumber": "PL61109010140000071219812874",
                        "bankName": "Santander",
                        "swiftCode": null
                    }))
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let projector = VendorProjector::new(repository);
        let event = consumed(&VendorBankDetailsUpdated {
            vendor_id: "v-1".into(),
            bank_account_number: "PL61109010140000071219812874".into(),
            bank_name: "Santander".into(),
            bank_swift_code: None,
        });
        projector.project(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_category_change_on_missing_vendor_is_skipped() {
        let mut repository = MockVendorReadRepository::new();
        repository.expect_find_by_id().returning(|_| Ok(None));
        repository.expect_save().never();

        let projector = VendorProjector::new(repository);
        let event = consumed(&VendorCategoryAssigned {
            vendor_id: "v-404".into(),
            category_id: "garden".into(),
            category_name: None,
        });
        projector.project(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let mut repository = MockVendorReadRepository::new();
        repository
            .expect_update_where()
            .returning(|_, _| Err(ProjectionError::Store(StoreError::MissingId)));

        let projector = VendorProjector::new(repository);
        let event = consumed(&VendorDeleted {
            vendor_id: "v-1".into(),
            reason: None,
        });
        let err = projector.project(&event).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Infrastructure);
    }

    #[test]
    fn test_register_covers_every_vendor_event() {
        let mut registry = HandlerRegistry::new();
        VendorProjector::new(MockVendorReadRepository::new()).register(&mut registry);

        assert_eq!(registry.len(), VENDOR_EVENTS.len());
        for kind in VENDOR_EVENTS {
            assert_eq!(registry.lookup(&kind).len(), 1);
        }
        assert!(registry.lookup(&EventKind::CustomerRegistered).is_empty());
    }
}
