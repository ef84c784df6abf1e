//! Cleanup after owned resources are deleted outside the sheet.
//!
//! Deleting an owned ability from the host's item directory leaves its slot
//! progress behind, and deleting an item leaves its equipped load counted.
//! Both are reset here so the next render starts from zero.

use std::sync::Arc;

use bladesheet_domain::blades::{
    ability_progress_field, ability_progress_key, equipped_item_field,
};
use bladesheet_domain::{DocumentKind, DocumentRef, FieldPath, OwnedResource, ResourceKind};
use serde_json::json;

use crate::infrastructure::ports::{DocumentStore, WriteOptions};
use crate::use_cases::sync::SyncError;

pub struct ResourceLifecycle {
    store: Arc<dyn DocumentStore>,
    module_id: String,
}

impl ResourceLifecycle {
    pub fn new(store: Arc<dyn DocumentStore>, module_id: impl Into<String>) -> Self {
        Self {
            store,
            module_id: module_id.into(),
        }
    }

    /// Field holding the progress of `resource`, if its kind tracks any.
    ///
    /// Abilities are keyed by their class-trimmed name; items by the
    /// catalogue key they were equipped under.
    pub fn progress_field(&self, resource: &OwnedResource) -> Result<Option<FieldPath>, SyncError> {
        let field = match resource.kind {
            ResourceKind::Ability => ability_progress_field(&self.module_id)?
                .with_key(&ability_progress_key(&resource.name, &resource.source_key)),
            ResourceKind::Item => equipped_item_field(&self.module_id)?.with_key(&resource.source_key),
            ResourceKind::CrewAbility | ResourceKind::CrewUpgrade => return Ok(None),
        };
        Ok(Some(field))
    }

    /// Reset the progress `resource` left on `owner`. Returns the field that
    /// was cleared, or `None` when there was nothing to clear.
    pub async fn on_resource_deleted(
        &self,
        owner: &DocumentRef,
        resource: &OwnedResource,
    ) -> Result<Option<FieldPath>, SyncError> {
        let Some(field) = self.progress_field(resource)? else {
            return Ok(None);
        };
        let Some(document) = self.store.resolve(owner).await? else {
            tracing::debug!(owner = %owner, "Owner gone; nothing to reset");
            return Ok(None);
        };
        if resource.kind == ResourceKind::Ability && document.kind != DocumentKind::Character {
            return Ok(None);
        }
        if document.u32_at(&field).unwrap_or(0) == 0 {
            return Ok(None);
        }

        self.store
            .write_field(owner, &field, json!(0), WriteOptions::quiet())
            .await?;
        tracing::info!(
            owner = %owner,
            kind = %resource.kind,
            resource = %resource.name,
            field = %field,
            "Reset progress of deleted resource"
        );
        Ok(Some(field))
    }
}
