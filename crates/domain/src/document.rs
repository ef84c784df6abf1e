//! Owning documents as seen by the progress engine.
//!
//! The host owns the real actor/item records. The engine only ever sees a
//! resolved copy: a loosely typed JSON payload addressed by [`FieldPath`]s
//! plus the list of owned resources (abilities, items, upgrades) embedded
//! in it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blades::trim_class_from_name;
use crate::ids::ResourceId;
use crate::reference::{DocumentRef, FieldPath};

/// Type of an owning document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Character,
    Crew,
    Clock,
    Item,
    Ability,
    /// Unknown for forward compatibility
    #[serde(other)]
    Other,
}

impl DocumentKind {
    /// Map a host type name onto a kind. Clock actors exist under two names.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim() {
            "character" => Self::Character,
            "crew" => Self::Crew,
            "clock" | "🕛 clock" => Self::Clock,
            "item" => Self::Item,
            "ability" => Self::Ability,
            _ => Self::Other,
        }
    }
}

/// Kind of resource whose existence is tied to a threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ability,
    Item,
    CrewAbility,
    CrewUpgrade,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ability => "ability",
            Self::Item => "item",
            Self::CrewAbility => "crew_ability",
            Self::CrewUpgrade => "crew_upgrade",
        };
        f.write_str(name)
    }
}

/// A resource embedded in (owned by) a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Key of the catalogue entry this resource was created from.
    pub source_key: String,
    pub name: String,
}

impl OwnedResource {
    /// Whether this resource was created from the catalogue entry `key`.
    ///
    /// Names are compared with any trailing class tag removed, so an owned
    /// "Ambush (Cutter)" matches the catalogue entry "Ambush".
    pub fn matches(&self, kind: ResourceKind, key: &str) -> bool {
        self.kind == kind
            && (self.source_key == key
                || self.name == key
                || trim_class_from_name(&self.name) == trim_class_from_name(key))
    }
}

/// Resolved snapshot of an owning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentRef,
    pub kind: DocumentKind,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub resources: Vec<OwnedResource>,
}

impl Document {
    pub fn new(reference: DocumentRef, kind: DocumentKind, name: impl Into<String>) -> Self {
        Self {
            reference,
            kind,
            name: name.into(),
            data: Value::Object(Map::new()),
            resources: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_resource(mut self, resource: OwnedResource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn value_at(&self, path: &FieldPath) -> Option<&Value> {
        value_at(&self.data, path)
    }

    pub fn u32_at(&self, path: &FieldPath) -> Option<u32> {
        self.value_at(path).and_then(as_u32)
    }

    /// Targeted write of a single field. Intermediate objects are created as
    /// needed and sibling fields are left untouched.
    pub fn set_field(&mut self, path: &FieldPath, value: Value) {
        let mut cursor = &mut self.data;
        for segment in path.segments() {
            if !cursor.is_object() {
                *cursor = Value::Object(Map::new());
            }
            let Value::Object(map) = cursor else {
                return;
            };
            cursor = map.entry(segment.to_string()).or_insert(Value::Null);
        }
        *cursor = value;
    }

    pub fn resource(&self, id: ResourceId) -> Option<&OwnedResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn find_resource(&self, kind: ResourceKind, key: &str) -> Option<&OwnedResource> {
        self.resources.iter().find(|r| r.matches(kind, key))
    }
}

/// Read a value at a dotted path inside a JSON payload.
pub fn value_at<'a>(data: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .try_fold(data, |cursor, segment| cursor.as_object()?.get(segment))
}

/// Interpret a JSON value as a number; numeric strings are accepted because
/// rendered inputs commonly post their values as text.
pub fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Non-negative integer view of a JSON value (floored; negatives become 0).
pub fn as_u32(value: &Value) -> Option<u32> {
    as_number(value).map(|n| n.max(0.0).min(f64::from(u32::MAX)).floor() as u32)
}
