//! Threshold side effects: create or destroy the bound resource when a
//! value crosses zero.

use bladesheet_domain::{Crossing, Document, ResourceId, ResourceTarget, ThresholdBinding};
use serde_json::{Map, Value};

use super::error::SyncError;
use crate::infrastructure::ports::DocumentStore;

/// What a threshold evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOutcome {
    /// No crossing, or no binding.
    Untouched,
    Created(ResourceId),
    Destroyed(ResourceId),
    /// The resource was already in the requested state.
    AlreadySatisfied(Crossing),
}

/// Evaluate `binding` for a change from `previous` to `next`.
///
/// Runs at most one create or destroy. A resource that already exists (on
/// acquire) or is already gone (on release) counts as success.
pub(crate) async fn apply_threshold(
    store: &dyn DocumentStore,
    document: &Document,
    binding: &ThresholdBinding,
    target: &ResourceTarget,
    previous: u32,
    next: u32,
) -> Result<ThresholdOutcome, SyncError> {
    let Some(crossing) = Crossing::between(previous, next) else {
        return Ok(ThresholdOutcome::Untouched);
    };
    let owner = &document.reference;
    let kind = binding.resource_kind;

    match crossing {
        Crossing::Acquire => {
            if document.find_resource(kind, &target.source_key).is_some() {
                return Ok(satisfied(crossing, target));
            }
            match store.create_resource(owner, kind, seed_data(target)).await {
                Ok(id) => {
                    tracing::info!(
                        owner = %owner,
                        kind = %kind,
                        resource = %target.name,
                        resource_id = %id,
                        "Created resource on threshold crossing"
                    );
                    Ok(ThresholdOutcome::Created(id))
                }
                Err(e) if e.is_already_exists() => Ok(satisfied(crossing, target)),
                Err(e) => Err(SyncError::Persistence(e)),
            }
        }
        Crossing::Release => {
            let owned = target
                .owned_id
                .filter(|id| document.resource(*id).is_some())
                .or_else(|| document.find_resource(kind, &target.source_key).map(|r| r.id));
            let Some(id) = owned else {
                return Ok(satisfied(crossing, target));
            };
            match store.destroy_resource(owner, id).await {
                Ok(()) => {
                    tracing::info!(
                        owner = %owner,
                        kind = %kind,
                        resource = %target.name,
                        resource_id = %id,
                        "Destroyed resource on threshold crossing"
                    );
                    Ok(ThresholdOutcome::Destroyed(id))
                }
                Err(e) if e.is_not_found() => Ok(satisfied(crossing, target)),
                Err(e) => Err(SyncError::Persistence(e)),
            }
        }
    }
}

fn satisfied(crossing: Crossing, target: &ResourceTarget) -> ThresholdOutcome {
    tracing::debug!(
        resource = %target.name,
        reason = %SyncError::ThresholdConflict(crossing),
        "Threshold already satisfied"
    );
    ThresholdOutcome::AlreadySatisfied(crossing)
}

fn seed_data(target: &ResourceTarget) -> Value {
    let mut data = match &target.seed {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    data.insert("name".to_string(), Value::String(target.name.clone()));
    data.insert(
        "sourceKey".to_string(),
        Value::String(target.source_key.clone()),
    );
    Value::Object(data)
}
