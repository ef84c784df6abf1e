//! Segmented progress controls and the threshold rules attached to them.
//!
//! A [`ProgressControl`] is one rendered instance of a "fill N of M" widget.
//! It is built from the owning document at render time and discarded on the
//! next render; it is never persisted itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{as_number, value_at, ResourceKind};
use crate::error::DomainError;
use crate::ids::{ControlId, GroupId, ResourceId};
use crate::reference::{DocumentRef, FieldPath};

// =============================================================================
// Control style
// =============================================================================

/// Visual family of a control. All families share one toggle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "style")]
pub enum ControlStyle {
    /// Linear run of radio segments with an explicit zero marker
    /// (stress, trauma, harm, xp).
    Track,
    /// Linear run of checkboxes (multi-slot abilities, load items).
    Slots,
    /// Circular clock: radio segments, a zero marker and a themed face image.
    Clock { theme: String },
}

impl ControlStyle {
    /// Radio-style controls mark exactly one segment; checkbox-style controls
    /// mark every filled segment.
    pub fn is_radio(&self) -> bool {
        !matches!(self, Self::Slots)
    }

    pub fn theme(&self) -> Option<&str> {
        match self {
            Self::Clock { theme } => Some(theme),
            _ => None,
        }
    }
}

// =============================================================================
// Threshold bindings
// =============================================================================

/// How a threshold binding derives a control's capacity from the entity
/// that would be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum CostRule {
    Fixed { cost: u32 },
    /// First numeric attribute found wins; non-numeric or sub-1 costs fall
    /// back to `fallback`.
    Attribute { paths: Vec<FieldPath>, fallback: u32 },
}

impl CostRule {
    pub fn evaluate(&self, entity: &Value) -> u32 {
        match self {
            Self::Fixed { cost } => (*cost).max(1),
            Self::Attribute { paths, fallback } => {
                let fallback = (*fallback).max(1);
                let raw = paths.iter().find_map(|path| {
                    value_at(entity, path).filter(|v| !v.is_null())
                });
                match raw.and_then(as_number) {
                    Some(n) if n >= 1.0 => n.min(f64::from(u32::MAX)).floor() as u32,
                    _ => fallback,
                }
            }
        }
    }
}

/// Rule tying a 0 ↔ non-zero crossing of `field` to the creation or
/// destruction of an owned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBinding {
    pub field: FieldPath,
    pub resource_kind: ResourceKind,
    pub cost: CostRule,
}

impl ThresholdBinding {
    pub fn new(field: FieldPath, resource_kind: ResourceKind, cost: CostRule) -> Self {
        Self {
            field,
            resource_kind,
            cost,
        }
    }

    /// Capacity of a control bound to `entity`.
    pub fn capacity_for(&self, entity: &Value) -> u32 {
        self.cost.evaluate(entity)
    }
}

/// Direction of a threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossing {
    /// 0 → >0: the resource must exist afterwards.
    Acquire,
    /// >0 → 0: the resource must be gone afterwards.
    Release,
}

impl Crossing {
    pub fn between(previous: u32, next: u32) -> Option<Self> {
        match (previous > 0, next > 0) {
            (false, true) => Some(Self::Acquire),
            (true, false) => Some(Self::Release),
            _ => None,
        }
    }
}

/// Per-instance data a threshold binding acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub kind: ResourceKind,
    /// Catalogue key the resource is created from.
    pub source_key: String,
    pub name: String,
    /// Id of the owned copy, when one is known to exist.
    pub owned_id: Option<ResourceId>,
    /// Data handed to the store when the resource is created.
    #[serde(default)]
    pub seed: Value,
}

// =============================================================================
// ProgressControl
// =============================================================================

/// One rendered instance of a segmented progress control.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressControl {
    id: ControlId,
    capacity: u32,
    value: u32,
    field_path: FieldPath,
    owner: DocumentRef,
    group_id: Option<GroupId>,
    style: ControlStyle,
    interactive: bool,
    label: Option<String>,
    resource: Option<ResourceTarget>,
}

impl ProgressControl {
    /// Build a control. `value` is clamped into `[0, capacity]`.
    pub fn new(
        owner: DocumentRef,
        field_path: FieldPath,
        capacity: u32,
        value: u32,
        style: ControlStyle,
    ) -> Result<Self, DomainError> {
        if capacity == 0 {
            return Err(DomainError::validation(format!(
                "capacity of {field_path} must be positive"
            )));
        }
        Ok(Self {
            id: ControlId::new(),
            capacity,
            value: value.min(capacity),
            field_path,
            owner,
            group_id: None,
            style,
            interactive: true,
            label: None,
            resource: None,
        })
    }

    /// Adopt the id markup was already mounted under.
    pub fn with_id(mut self, id: ControlId) -> Self {
        self.id = id;
        self
    }

    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_resource(mut self, resource: ResourceTarget) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Mark the control non-interactive (historical projections).
    pub fn read_only(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn id(&self) -> ControlId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn field_path(&self) -> &FieldPath {
        &self.field_path
    }

    pub fn owner(&self) -> &DocumentRef {
        &self.owner
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    pub fn style(&self) -> &ControlStyle {
        &self.style
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn resource(&self) -> Option<&ResourceTarget> {
        self.resource.as_ref()
    }

    /// Set the value, clamped into `[0, capacity]`. Returns the stored value.
    pub fn set_value(&mut self, value: u32) -> u32 {
        self.value = value.min(self.capacity);
        self.value
    }

    pub fn set_owned_resource(&mut self, owned_id: Option<ResourceId>) {
        if let Some(resource) = self.resource.as_mut() {
            resource.owned_id = owned_id;
        }
    }
}
