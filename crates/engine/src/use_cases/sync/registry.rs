//! Explicit registration of progress control classes.
//!
//! Each rendering context declares the controls it renders under a
//! selector; mounting looks the selector up instead of listening for every
//! click on the page.

use bladesheet_domain::{
    ControlStyle, CostRule, Document, DomainError, FieldPath, ResourceTarget, ThresholdBinding,
};
use dashmap::DashMap;
use serde_json::Value;

use super::error::SyncError;

/// Where a control's capacity comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CapacitySource {
    Fixed(u32),
    /// Read from a field of the owning document (e.g. `system.stress.max`).
    Field(FieldPath),
    /// Derived from the instance entity (ability price, item load).
    Cost(CostRule),
}

/// Declaration of one class of rendered controls.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSpec {
    pub capacity: CapacitySource,
    /// May contain `{key}`, substituted per instance.
    pub field_path: FieldPath,
    /// Members move in lockstep as one all-or-nothing cost.
    pub grouped: bool,
    pub threshold: Option<ThresholdBinding>,
    pub style: ControlStyle,
    /// Toggles adjust the owner's load tally.
    pub affects_load: bool,
}

impl ControlSpec {
    pub fn new(field_path: FieldPath, capacity: CapacitySource, style: ControlStyle) -> Self {
        Self {
            capacity,
            field_path,
            grouped: false,
            threshold: None,
            style,
            affects_load: false,
        }
    }

    pub fn grouped(mut self) -> Self {
        self.grouped = true;
        self
    }

    pub fn with_threshold(mut self, threshold: ThresholdBinding) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn affecting_load(mut self) -> Self {
        self.affects_load = true;
        self
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.capacity == CapacitySource::Fixed(0) {
            return Err(DomainError::validation(format!(
                "capacity of {} must be positive",
                self.field_path
            )));
        }
        if let Some(threshold) = &self.threshold {
            if threshold.field != self.field_path {
                return Err(DomainError::constraint(format!(
                    "threshold bound to {} but control writes {}",
                    threshold.field, self.field_path
                )));
            }
            if self.capacity != CapacitySource::Cost(threshold.cost.clone()) {
                return Err(DomainError::constraint(format!(
                    "capacity of {} must come from its threshold cost rule",
                    self.field_path
                )));
            }
        }
        Ok(())
    }

    /// Capacity of one instance, or `None` when it cannot be determined.
    ///
    /// A threshold binding's cost rule sizes the control.
    pub fn capacity_for(&self, document: &Document, entity: &Value) -> Option<u32> {
        if let Some(threshold) = &self.threshold {
            return Some(threshold.capacity_for(entity));
        }
        match &self.capacity {
            CapacitySource::Fixed(capacity) => Some(*capacity),
            CapacitySource::Field(path) => document.u32_at(path).filter(|c| *c > 0),
            CapacitySource::Cost(rule) => Some(rule.evaluate(entity)),
        }
    }
}

/// One rendered instance of a registered control class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlInstance {
    /// Substituted into a templated field path.
    pub key: Option<String>,
    pub label: Option<String>,
    /// Catalogue entity the instance stands for; feeds cost rules.
    pub entity: Value,
    pub resource: Option<ResourceTarget>,
}

impl ControlInstance {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_entity(mut self, entity: Value) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_resource(mut self, resource: ResourceTarget) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Field this instance writes.
    pub fn field_path(&self, spec: &ControlSpec) -> Result<FieldPath, DomainError> {
        match (&self.key, spec.field_path.is_template()) {
            (Some(key), true) => Ok(spec.field_path.with_key(key)),
            (None, true) => Err(DomainError::validation(format!(
                "{} needs an instance key",
                spec.field_path
            ))),
            (_, false) => Ok(spec.field_path.clone()),
        }
    }
}

/// Registered control classes by selector.
#[derive(Default)]
pub struct ControlRegistry {
    specs: DashMap<String, ControlSpec>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a class of rendered controls to the engine. Re-registering a
    /// selector replaces its spec.
    pub fn register_progress_control(
        &self,
        selector: impl Into<String>,
        spec: ControlSpec,
    ) -> Result<(), SyncError> {
        spec.validate()?;
        let selector = selector.into();
        tracing::debug!(selector = %selector, field = %spec.field_path, "Registered progress control");
        self.specs.insert(selector, spec);
        Ok(())
    }

    pub fn get(&self, selector: &str) -> Result<ControlSpec, SyncError> {
        self.specs
            .get(selector)
            .map(|spec| spec.clone())
            .ok_or_else(|| SyncError::UnknownSelector(selector.to_string()))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
