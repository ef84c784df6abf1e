//! Persistence ports: owning documents and per-view UI state.

use async_trait::async_trait;
use bladesheet_domain::{Document, DocumentRef, FieldPath, ResourceId, ResourceKind};
use serde_json::Value;

use super::error::StoreError;

/// Options attached to a scoped field write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// The write must not trigger a full re-render of the owning view.
    pub suppress_rerender: bool,
}

impl WriteOptions {
    pub fn quiet() -> Self {
        Self {
            suppress_rerender: true,
        }
    }
}

/// Host document store. Every write touches exactly one field.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document no longer exists.
    async fn resolve(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError>;

    async fn write_field(
        &self,
        reference: &DocumentRef,
        path: &FieldPath,
        value: Value,
        options: WriteOptions,
    ) -> Result<(), StoreError>;

    /// Create a resource owned by `reference`. `data` carries at least
    /// `name` and `sourceKey`.
    async fn create_resource(
        &self,
        reference: &DocumentRef,
        kind: ResourceKind,
        data: Value,
    ) -> Result<ResourceId, StoreError>;

    async fn destroy_resource(
        &self,
        reference: &DocumentRef,
        resource: ResourceId,
    ) -> Result<(), StoreError>;
}

/// Opaque per-view UI state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UiStateStore: Send + Sync {
    async fn load(&self, view: &str) -> Result<Option<Value>, StoreError>;
    async fn save(&self, view: &str, state: Value) -> Result<(), StoreError>;
}
