//! Category projection
//!
//! Keeps the category tree denormalized in both directions: a child carries
//! its parent's id and name, a parent carries `{id, name}` for each child.
//! Every cross-document change is a field-level update (`$addToSet`, `$pull`,
//! multi-document set) so it stays safe while other partitions write the
//! same parent.

use async_trait::async_trait;
use document_store::Update;
use event_bus::{
    ConsumedEvent, EventHandler, EventKind, HandlerError, HandlerRegistry, Provenance, stamped,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ProjectionResult;
use crate::events::{CategoryCreated, CategoryDeleted, CategoryUpdated, SubcategoryAdded};
use crate::models::CategoryReadModel;
use crate::repository::CategoryReadRepository;

pub const CATEGORY_EVENTS: [EventKind; 4] = [
    EventKind::CategoryCreated,
    EventKind::CategoryUpdated,
    EventKind::SubcategoryAdded,
    EventKind::CategoryDeleted,
];

fn subcategory_entry(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

pub struct CategoryProjector<R> {
    repository: R,
}

impl<R: CategoryReadRepository> CategoryProjector<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub async fn project(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        info!(
            event_type = %event.kind(),
            category_id = %event.envelope.aggregate_id,
            "Projecting category event"
        );

        match event.kind() {
            EventKind::CategoryCreated => self.on_created(event, event.payload()?).await?,
            EventKind::CategoryUpdated => self.on_updated(event, event.payload()?).await?,
            EventKind::SubcategoryAdded => {
                self.on_subcategory_added(event, event.payload()?).await?
            }
            EventKind::CategoryDeleted => self.on_deleted(event, event.payload()?).await?,
            other => debug!(event_type = %other, "Not a category event"),
        }
        Ok(())
    }

    pub fn register(self, registry: &mut HandlerRegistry)
    where
        R: 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(self);
        for kind in CATEGORY_EVENTS {
            registry.register(kind, Arc::clone(&handler));
        }
    }

    async fn apply(&self, id: &str, update: Update) -> ProjectionResult<bool> {
        let found = self.repository.update(id, update).await?;
        if !found {
            warn!(category_id = id, "Category read model not found, update skipped");
        }
        Ok(found)
    }

    async fn on_created(&self, event: &ConsumedEvent, created: CategoryCreated) -> ProjectionResult<()> {
        let parent = match &created.parent_category_id {
            Some(parent_id) => self.repository.find_by_id(parent_id).await?,
            None => None,
        };

        let category = CategoryReadModel::created(
            &created,
            parent.as_ref().map(|p| p.name.clone()),
            event.envelope.timestamp,
            Provenance::stamp(event, "CreateCategory"),
        );
        if !self.repository.insert_if_absent(&category).await? {
            debug!(category_id = %category.id, "Category already projected, creation ignored");
        }

        // $addToSet keeps this safe to repeat on redelivery.
        if let Some(parent_id) = &created.parent_category_id {
            let update = stamped(event, "AddSubcategory").add_to_set(
                "subcategories",
                subcategory_entry(&created.category_id, &created.name),
            );
            self.apply(parent_id, update).await?;
        }
        Ok(())
    }

    async fn on_updated(&self, event: &ConsumedEvent, updated: CategoryUpdated) -> ProjectionResult<()> {
        let id = updated.category_id.as_str();
        let changes = updated.changes;
        let attributes = changes.attributes.map(|attributes| {
            Value::Object(
                attributes
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            )
        });

        let update = stamped(event, "UpdateCategory")
            .set_some("name", changes.name.clone())
            .set_some("description", changes.description)
            .set_some("slug", changes.slug)
            .set_some("attributes", attributes)
            .set_some("active", changes.active)
            .set_some("iconUrl", changes.icon_url)
            .set_some("imageUrl", changes.image_url)
            .set_some("displayOrder", changes.display_order);
        if !self.apply(id, update).await? {
            return Ok(());
        }

        if let Some(name) = changes.name {
            self.propagate_rename(event, id, &name).await?;
        }
        Ok(())
    }

    async fn propagate_rename(&self, event: &ConsumedEvent, id: &str, name: &str) -> ProjectionResult<()> {
        let children = self
            .repository
            .update_children(
                id,
                stamped(event, "UpdateParentCategoryName").set("parentCategoryName", name),
            )
            .await?;
        debug!(category_id = id, children, "Propagated rename to subcategories");

        let Some(parent_id) = self
            .repository
            .find_by_id(id)
            .await?
            .and_then(|category| category.parent_category_id)
        else {
            return Ok(());
        };

        self.repository
            .update(
                &parent_id,
                Update::new().pull("subcategories", json!({ "id": id })),
            )
            .await?;
        let update = stamped(event, "UpdateSubcategoryName")
            .add_to_set("subcategories", subcategory_entry(id, name));
        self.apply(&parent_id, update).await?;
        Ok(())
    }

    async fn on_subcategory_added(
        &self,
        event: &ConsumedEvent,
        added: SubcategoryAdded,
    ) -> ProjectionResult<()> {
        let (Some(parent), Some(child)) = (
            self.repository.find_by_id(&added.category_id).await?,
            self.repository.find_by_id(&added.subcategory_id).await?,
        ) else {
            warn!(
                category_id = %added.category_id,
                subcategory_id = %added.subcategory_id,
                "Parent or subcategory not projected yet, relationship skipped"
            );
            return Ok(());
        };

        let update = stamped(event, "AddSubcategory")
            .add_to_set("subcategories", subcategory_entry(&child.id, &child.name));
        self.apply(&parent.id, update).await?;

        let update = stamped(event, "SetParentCategory")
            .set("parentCategoryId", parent.id.clone())
            .set("parentCategoryName", parent.name);
        self.apply(&child.id, update).await?;
        Ok(())
    }

    async fn on_deleted(&self, event: &ConsumedEvent, deleted: CategoryDeleted) -> ProjectionResult<()> {
        let id = deleted.category_id.as_str();
        let update = stamped(event, "DeleteCategory").set("active", false);
        if !self.apply(id, update).await? {
            return Ok(());
        }

        let parent_id = self
            .repository
            .find_by_id(id)
            .await?
            .and_then(|category| category.parent_category_id);
        if let Some(parent_id) = parent_id {
            let update = stamped(event, "RemoveSubcategory")
                .pull("subcategories", json!({ "id": id }));
            self.apply(&parent_id, update).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: CategoryReadRepository> EventHandler for CategoryProjector<R> {
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        self.project(event).await
    }

    fn name(&self) -> &str {
        "category-projection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockCategoryReadRepository;
    use crate::test_support::consumed;
    use chrono::Utc;
    use document_store::model::UpdateOp;
    use mockall::predicate::eq;

    fn category(id: &str, name: &str, parent: Option<&str>) -> CategoryReadModel {
        let created = CategoryCreated {
            category_id: id.into(),
            name: name.into(),
            description: None,
            slug: name.to_lowercase(),
            parent_category_id: parent.map(String::from),
            attributes: Default::default(),
            active: true,
            icon_url: None,
            image_url: None,
            display_order: 0,
        };
        CategoryReadModel::created(&created, None, Utc::now(), Provenance::default())
    }

    fn has_op(update: &Update, expected: &UpdateOp) -> bool {
        update.ops().contains(expected)
    }

    #[tokio::test]
    async fn test_child_creation_links_parent() {
        let mut repository = MockCategoryReadRepository::new();
        repository
            .expect_find_by_id()
            .with(eq("root"))
            .returning(|_| Ok(Some(category("root", "Home", None))));
        repository
            .expect_insert_if_absent()
            .withf(|c| {
                c.parent_category_name.as_deref() == Some("Home")
                    && c.provenance.last_operation.as_deref() == Some("CreateCategory")
            })
            .returning(|_| Ok(true));
        repository
            .expect_update()
            .withf(|id, update| {
                id == "root"
                    && has_op(
                        update,
                        &UpdateOp::AddToSet(
                            "subcategories".into(),
                            json!({ "id": "kitchen", "name": "Kitchen" }),
                        ),
                    )
                    && has_op(
                        update,
                        &UpdateOp::Set("lastOperation".into(), json!("AddSubcategory")),
                    )
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let event = consumed(&CategoryCreated {
            category_id: "kitchen".into(),
            name: "Kitchen".into(),
            description: None,
            slug: "kitchen".into(),
            parent_category_id: Some("root".into()),
            attributes: Default::default(),
            active: true,
            icon_url: None,
            image_url: None,
            display_order: 1,
        });
        CategoryProjector::new(repository).project(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_reaches_children_and_parent() {
        let mut repository = MockCategoryReadRepository::new();
        repository
            .expect_update()
            .withf(|id, update| {
                id == "kitchen"
                    && has_op(update, &UpdateOp::Set("name".into(), json!("Cooking")))
            })
            .times(1)
            .returning(|_, _| Ok(true));
        repository
            .expect_update_children()
            .withf(|parent, update| {
                parent == "kitchen"
                    && has_op(
                        update,
                        &UpdateOp::Set("parentCategoryName".into(), json!("Cooking")),
                    )
            })
            .times(1)
            .returning(|_, _| Ok(2));
        repository
            .expect_find_by_id()
            .with(eq("kitchen"))
            .returning(|_| Ok(Some(category("kitchen", "Cooking", Some("root")))));
        repository
            .expect_update()
            .withf(|id, update| {
                id == "root"
                    && has_op(
                        update,
                        &UpdateOp::Pull("subcategories".into(), json!({ "id": "kitchen" })),
                    )
            })
            .times(1)
            .returning(|_, _| Ok(true));
        repository
            .expect_update()
            .withf(|id, update| {
                id == "root"
                    && has_op(
                        update,
                        &UpdateOp::AddToSet(
                            "subcategories".into(),
                            json!({ "id": "kitchen", "name": "Cooking" }),
                        ),
                    )
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let event = consumed(&CategoryUpdated {
            category_id: "kitchen".into(),
            changes: crate::events::CategoryChanges {
                name: Some("Cooking".into()),
                ..Default::default()
            },
        });
        CategoryProjector::new(repository).project(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_subcategory_added_before_child_exists_is_skipped() {
        let mut repository = MockCategoryReadRepository::new();
        repository
            .expect_find_by_id()
            .with(eq("root"))
            .returning(|_| Ok(Some(category("root", "Home", None))));
        repository
            .expect_find_by_id()
            .with(eq("ghost"))
            .returning(|_| Ok(None));
        repository.expect_update().never();

        let event = consumed(&SubcategoryAdded {
            category_id: "root".into(),
            subcategory_id: "ghost".into(),
        });
        CategoryProjector::new(repository).project(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_detaches_from_parent() {
        let mut repository = MockCategoryReadRepository::new();
        repository
            .expect_update()
            .withf(|id, update| {
                id == "kitchen" && has_op(update, &UpdateOp::Set("active".into(), json!(false)))
            })
            .times(1)
            .returning(|_, _| Ok(true));
        repository
            .expect_find_by_id()
            .returning(|_| Ok(Some(category("kitchen", "Kitchen", Some("root")))));
        repository
            .expect_update()
            .withf(|id, update| {
                id == "root"
                    && has_op(
                        update,
                        &UpdateOp::Set("lastOperation".into(), json!("RemoveSubcategory")),
                    )
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let event = consumed(&CategoryDeleted {
            category_id: "kitchen".into(),
        });
        CategoryProjector::new(repository).project(&event).await.unwrap();
    }
}
