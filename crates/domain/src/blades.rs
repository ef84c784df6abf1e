//! Blades in the Dark rules that shape progress controls.
//!
//! Key pieces:
//! - Clocks live on their own documents (`system.type` segments,
//!   `system.value` filled, `system.theme` face set)
//! - Multi-slot abilities cost 1+ slots; owning the ability means at least
//!   one slot is filled
//! - Load levels add a bonus on top of the character's base load

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::{ControlStyle, CostRule, ProgressControl};
use crate::document::{as_u32, Document, DocumentKind};
use crate::error::DomainError;
use crate::reference::{DocumentRef, FieldPath};

pub const DEFAULT_CLOCK_THEME: &str = "black";
pub const DEFAULT_CLOCK_SIZE: u32 = 4;

/// Flag namespace used by the alternate sheets.
pub const DEFAULT_MODULE_ID: &str = "bitd-alternate-sheets";

/// Upper bound of the displayed loadout.
pub const MAX_LOADOUT: u32 = 10;

// =============================================================================
// Clocks
// =============================================================================

/// Fallbacks for clock documents that omit size or theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockDefaults {
    pub size: u32,
    pub theme: String,
}

impl Default for ClockDefaults {
    fn default() -> Self {
        Self {
            size: DEFAULT_CLOCK_SIZE,
            theme: DEFAULT_CLOCK_THEME.to_string(),
        }
    }
}

/// Progress clock read from a clock document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockState {
    pub name: String,
    pub capacity: u32,
    pub value: u32,
    pub theme: String,
}

impl ClockState {
    pub fn value_field() -> FieldPath {
        FieldPath::default()
    }

    /// Read a clock from `doc`; `None` when the document is not a clock.
    pub fn from_document(doc: &Document, defaults: &ClockDefaults) -> Option<Self> {
        if doc.kind != DocumentKind::Clock {
            return None;
        }
        let capacity = FieldPath::new("system.type")
            .ok()
            .and_then(|path| doc.u32_at(&path))
            .filter(|size| *size > 0)
            .unwrap_or(defaults.size.max(1));
        let value = doc.u32_at(&Self::value_field()).unwrap_or(0).min(capacity);
        let theme = FieldPath::new("system.theme")
            .ok()
            .and_then(|path| doc.value_at(&path).and_then(Value::as_str).map(str::to_string))
            .filter(|theme| !theme.trim().is_empty())
            .unwrap_or_else(|| defaults.theme.clone());
        Some(Self {
            name: doc.name.clone(),
            capacity,
            value,
            theme,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.value >= self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.value)
    }

    /// Build the control for this clock, showing `value` instead of the
    /// clock's own value (used by snapshot projection).
    pub fn control_with_value(
        &self,
        owner: DocumentRef,
        value: u32,
    ) -> Result<ProgressControl, DomainError> {
        Ok(ProgressControl::new(
            owner,
            Self::value_field(),
            self.capacity,
            value,
            ControlStyle::Clock {
                theme: self.theme.clone(),
            },
        )?
        .with_label(self.name.clone()))
    }

    pub fn control(&self, owner: DocumentRef) -> Result<ProgressControl, DomainError> {
        self.control_with_value(owner, self.value)
    }
}

// =============================================================================
// Abilities
// =============================================================================

/// Strip a trailing parenthesised class tag: "Ambush (Cutter)" → "Ambush".
pub fn trim_class_from_name(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.strip_suffix(')').and_then(|s| s.rfind('(').map(|i| &s[..i])) {
        Some(head) if !head.trim().is_empty() => head.trim_end(),
        _ => trimmed,
    }
}

/// Key under which an ability's slot progress is stored.
pub fn ability_progress_key(name: &str, id: &str) -> String {
    let trimmed = trim_class_from_name(name);
    if trimmed.is_empty() {
        id.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Cost of an ability: `system.price`, then `system.cost`, else 1.
pub fn ability_cost_rule() -> CostRule {
    CostRule::Attribute {
        paths: ["system.price", "system.cost"]
            .into_iter()
            .filter_map(|p| FieldPath::new(p).ok())
            .collect(),
        fallback: 1,
    }
}

/// Progress shown for an ability: stored progress clamped to its cost,
/// and never zero while the ability is owned.
pub fn rendered_ability_progress(stored: u32, cost: u32, owned: bool) -> u32 {
    let progress = stored.min(cost);
    if owned && progress < 1 {
        1
    } else {
        progress
    }
}

/// Templated field holding per-ability slot progress.
pub fn ability_progress_field(module_id: &str) -> Result<FieldPath, DomainError> {
    FieldPath::new(format!("flags.{module_id}.multiAbilityProgress.{{key}}"))
}

/// Templated field holding the equipped load of each item.
pub fn equipped_item_field(module_id: &str) -> Result<FieldPath, DomainError> {
    FieldPath::new(format!("flags.{module_id}.equipped-items.{{key}}"))
}

// =============================================================================
// Load
// =============================================================================

/// Load levels for equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadLevel {
    /// Base + 3
    Light,
    /// Base + 5
    Normal,
    /// Base + 6, -1d to Prowess actions
    Heavy,
    /// Deep Cuts: base + 4
    Discreet,
    /// Deep Cuts: base + 6
    Conspicuous,
    /// Deep Cuts: base + 9
    Encumbered,
}

impl LoadLevel {
    /// Resolve a stored level label for the active rule set. Unknown or
    /// mismatched labels fall back to the rule set's default level.
    pub fn from_label(label: &str, deep_cuts: bool) -> Self {
        let parsed = match label.trim().trim_start_matches("BITD.") {
            "Light" => Some(Self::Light),
            "Normal" => Some(Self::Normal),
            "Heavy" => Some(Self::Heavy),
            "Discreet" => Some(Self::Discreet),
            "Conspicuous" => Some(Self::Conspicuous),
            "Encumbered" => Some(Self::Encumbered),
            _ => None,
        };
        match parsed {
            Some(level) if level.is_deep_cuts() == deep_cuts => level,
            _ if deep_cuts => Self::Discreet,
            _ => Self::Normal,
        }
    }

    pub fn is_deep_cuts(&self) -> bool {
        matches!(self, Self::Discreet | Self::Conspicuous | Self::Encumbered)
    }

    pub fn bonus(&self) -> u32 {
        match self {
            Self::Light => 3,
            Self::Normal => 5,
            Self::Heavy => 6,
            Self::Discreet => 4,
            Self::Conspicuous => 6,
            Self::Encumbered => 9,
        }
    }

    pub fn max_load(&self, base_max_load: u32) -> u32 {
        base_max_load + self.bonus()
    }

    pub fn prowess_penalty(&self) -> u8 {
        match self {
            Self::Heavy | Self::Encumbered => 1,
            _ => 0,
        }
    }
}

/// Sum of equipped item loads, clamped to `[0, MAX_LOADOUT]`.
pub fn loadout(loads: impl IntoIterator<Item = u32>) -> u32 {
    loads
        .into_iter()
        .fold(0u32, u32::saturating_add)
        .min(MAX_LOADOUT)
}

/// Displayed "current / max" load meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTally {
    pub current: u32,
    pub max: u32,
}

impl LoadTally {
    /// Tally for a character document: equipped item loads against the
    /// selected load level. Equipped entries may be a bare load or an
    /// object carrying a `load` field.
    pub fn for_character(doc: &Document, module_id: &str, deep_cuts: bool) -> Self {
        let equipped = FieldPath::new(format!("flags.{module_id}.equipped-items"))
            .ok()
            .and_then(|path| doc.value_at(&path).and_then(Value::as_object).cloned())
            .unwrap_or_default();
        let current = loadout(
            equipped
                .values()
                .map(|entry| as_u32(entry.get("load").unwrap_or(entry)).unwrap_or(0)),
        );

        let read = |path: &str| FieldPath::new(path).ok().and_then(|p| doc.value_at(&p).cloned());
        let level = read("system.selected_load_level")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let base = read("system.base_max_load")
            .and_then(|v| as_u32(&v))
            .unwrap_or(0);
        Self {
            current,
            max: LoadLevel::from_label(&level, deep_cuts).max_load(base),
        }
    }

    pub fn over_max(&self) -> bool {
        self.current > self.max
    }

    /// Shift the current load by `delta`, never below zero.
    pub fn adjusted(self, delta: i64) -> Self {
        let current = (i64::from(self.current) + delta).clamp(0, i64::from(u32::MAX)) as u32;
        Self { current, ..self }
    }
}
