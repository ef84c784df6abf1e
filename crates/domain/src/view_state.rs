//! Per-view UI state for a sheet.
//!
//! State transitions take the current state and return the next one; the
//! sheet never keeps these flags on itself. Only the filter toggles survive
//! a reload: they are stored as an opaque JSON object keyed per view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collapsible summary boxes on the character sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Coins,
    Harm,
    Load,
}

/// Lists that can be narrowed to owned entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Abilities,
    Items,
    Acquaintances,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewState {
    #[serde(skip)]
    pub coins_open: bool,
    #[serde(skip)]
    pub harm_open: bool,
    #[serde(skip)]
    pub load_open: bool,
    #[serde(skip)]
    pub allow_edit: bool,
    #[serde(skip)]
    pub show_debug: bool,
    pub show_filtered_abilities: bool,
    pub show_filtered_items: bool,
    pub show_filtered_acquaintances: bool,
}

impl ViewState {
    /// Restore persisted flags. Anything unreadable falls back to defaults.
    pub fn from_persisted(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Flags worth persisting, as an opaque JSON object.
    pub fn persisted(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_open(&self, panel: Panel) -> bool {
        match panel {
            Panel::Coins => self.coins_open,
            Panel::Harm => self.harm_open,
            Panel::Load => self.load_open,
        }
    }

    pub fn is_filtered(&self, filter: Filter) -> bool {
        match filter {
            Filter::Abilities => self.show_filtered_abilities,
            Filter::Items => self.show_filtered_items,
            Filter::Acquaintances => self.show_filtered_acquaintances,
        }
    }

    pub fn toggle_panel(mut self, panel: Panel) -> Self {
        let open = !self.is_open(panel);
        *self.panel_mut(panel) = open;
        self
    }

    /// A click landed somewhere on the sheet: every panel that does not
    /// contain the click closes.
    pub fn click_outside(mut self, inside: Option<Panel>) -> Self {
        for panel in [Panel::Coins, Panel::Harm, Panel::Load] {
            if Some(panel) != inside {
                *self.panel_mut(panel) = false;
            }
        }
        self
    }

    pub fn toggle_filter(mut self, filter: Filter) -> Self {
        let slot = match filter {
            Filter::Abilities => &mut self.show_filtered_abilities,
            Filter::Items => &mut self.show_filtered_items,
            Filter::Acquaintances => &mut self.show_filtered_acquaintances,
        };
        *slot = !*slot;
        self
    }

    pub fn toggle_edit(mut self) -> Self {
        self.allow_edit = !self.allow_edit;
        self
    }

    pub fn toggle_debug(mut self) -> Self {
        self.show_debug = !self.show_debug;
        self
    }

    fn panel_mut(&mut self, panel: Panel) -> &mut bool {
        match panel {
            Panel::Coins => &mut self.coins_open,
            Panel::Harm => &mut self.harm_open,
            Panel::Load => &mut self.load_open,
        }
    }
}
