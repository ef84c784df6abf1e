//! In-memory document and UI-state stores for development and testing.
//!
//! Nothing is persisted. Writes can be made to fail on demand so the
//! revert path can be exercised without a host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bladesheet_domain::{
    Document, DocumentRef, FieldPath, OwnedResource, ResourceId, ResourceKind,
};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{DocumentStore, StoreError, UiStateStore, WriteOptions};

/// One recorded field write.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub reference: DocumentRef,
    pub path: FieldPath,
    pub value: Value,
    pub options: WriteOptions,
}

/// Resource create/destroy calls, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceCall {
    Create { owner: DocumentRef, kind: ResourceKind },
    Destroy { owner: DocumentRef, resource: ResourceId },
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<DocumentRef, Document>,
    writes: Arc<RwLock<Vec<FieldWrite>>>,
    resource_calls: Arc<RwLock<Vec<ResourceCall>>>,
    fail_writes: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Document) {
        self.documents.insert(document.reference.clone(), document);
    }

    pub fn get(&self, reference: &DocumentRef) -> Option<Document> {
        self.documents.get(reference).map(|doc| doc.clone())
    }

    /// Remove a document as if another session deleted it.
    pub fn remove(&self, reference: &DocumentRef) -> Option<Document> {
        self.documents.remove(reference).map(|(_, doc)| doc)
    }

    /// Edit a document outside the engine (another session, a macro).
    pub fn update<F>(&self, reference: &DocumentRef, edit: F) -> bool
    where
        F: FnOnce(&mut Document),
    {
        match self.documents.get_mut(reference) {
            Some(mut doc) => {
                edit(&mut doc);
                true
            }
            None => false,
        }
    }

    /// Make subsequent field writes and resource calls fail with `Rejected`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn writes(&self) -> Vec<FieldWrite> {
        self.writes.read().await.clone()
    }

    pub async fn resource_calls(&self) -> Vec<ResourceCall> {
        self.resource_calls.read().await.clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::rejected("store is refusing writes"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn resolve(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
        Ok(self.get(reference))
    }

    async fn write_field(
        &self,
        reference: &DocumentRef,
        path: &FieldPath,
        value: Value,
        options: WriteOptions,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        {
            let mut doc = self
                .documents
                .get_mut(reference)
                .ok_or_else(|| StoreError::not_found("Document", reference))?;
            doc.set_field(path, value.clone());
        }
        self.writes.write().await.push(FieldWrite {
            reference: reference.clone(),
            path: path.clone(),
            value,
            options,
        });
        Ok(())
    }

    async fn create_resource(
        &self,
        reference: &DocumentRef,
        kind: ResourceKind,
        data: Value,
    ) -> Result<ResourceId, StoreError> {
        self.check_writable()?;
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        let name = text("name").unwrap_or_default();
        let source_key = text("sourceKey").unwrap_or_else(|| name.clone());
        let id = {
            let mut doc = self
                .documents
                .get_mut(reference)
                .ok_or_else(|| StoreError::not_found("Document", reference))?;
            if doc.find_resource(kind, &source_key).is_some() {
                return Err(StoreError::already_exists("Resource", source_key));
            }
            let id = ResourceId::new();
            doc.resources.push(OwnedResource {
                id,
                kind,
                source_key,
                name,
            });
            id
        };
        self.resource_calls.write().await.push(ResourceCall::Create {
            owner: reference.clone(),
            kind,
        });
        Ok(id)
    }

    async fn destroy_resource(
        &self,
        reference: &DocumentRef,
        resource: ResourceId,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        {
            let mut doc = self
                .documents
                .get_mut(reference)
                .ok_or_else(|| StoreError::not_found("Document", reference))?;
            let before = doc.resources.len();
            doc.resources.retain(|r| r.id != resource);
            if doc.resources.len() == before {
                return Err(StoreError::not_found("Resource", resource));
            }
        }
        self.resource_calls.write().await.push(ResourceCall::Destroy {
            owner: reference.clone(),
            resource,
        });
        Ok(())
    }
}

/// In-memory UI-state store keyed by view name.
#[derive(Default)]
pub struct InMemoryUiStateStore {
    states: DashMap<String, Value>,
}

impl InMemoryUiStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UiStateStore for InMemoryUiStateStore {
    async fn load(&self, view: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.states.get(view).map(|state| state.clone()))
    }

    async fn save(&self, view: &str, state: Value) -> Result<(), StoreError> {
        self.states.insert(view.to_string(), state);
        Ok(())
    }
}
