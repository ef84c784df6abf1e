//! Engine configuration from environment variables.
//!
//! Supported variables:
//! - BLADESHEET_MODULE_ID: flag namespace for ability progress and equipped items
//! - BLADESHEET_CLOCK_THEME: theme for clocks that do not name one
//! - BLADESHEET_DEFAULT_CLOCK_SIZE: segments for clocks that do not set a size (1-12)
//! - BLADESHEET_DEEP_CUTS_LOAD: use the Deep Cuts load levels

use bladesheet_domain::blades::{
    ability_progress_field, equipped_item_field, DEFAULT_CLOCK_SIZE, DEFAULT_CLOCK_THEME,
    DEFAULT_MODULE_ID,
};
use bladesheet_domain::{ClockDefaults, DomainError, FieldPath};

const MAX_CLOCK_SIZE: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub module_id: String,
    pub clock: ClockDefaults,
    pub deep_cuts_load: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_id: DEFAULT_MODULE_ID.to_string(),
            clock: ClockDefaults::default(),
            deep_cuts_load: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Invalid values are ignored with a
    /// warning and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(module_id) = read("BLADESHEET_MODULE_ID") {
            if module_id.contains(['.', '{', '}']) {
                tracing::warn!(val = %module_id, "BLADESHEET_MODULE_ID must be a single path segment, ignoring");
            } else {
                config.module_id = module_id;
            }
        }

        if let Some(theme) = read("BLADESHEET_CLOCK_THEME") {
            config.clock.theme = theme;
        }

        if let Some(val) = read("BLADESHEET_DEFAULT_CLOCK_SIZE") {
            match val.parse::<u32>() {
                Ok(size) if (1..=MAX_CLOCK_SIZE).contains(&size) => config.clock.size = size,
                Ok(size) => tracing::warn!(
                    size,
                    "BLADESHEET_DEFAULT_CLOCK_SIZE out of range [1, 12], ignoring"
                ),
                Err(_) => tracing::warn!(
                    val = %val,
                    "BLADESHEET_DEFAULT_CLOCK_SIZE is not a valid u32, ignoring"
                ),
            }
        }

        if let Some(val) = read("BLADESHEET_DEEP_CUTS_LOAD") {
            match parse_flag(&val) {
                Some(flag) => config.deep_cuts_load = flag,
                None => tracing::warn!(val = %val, "BLADESHEET_DEEP_CUTS_LOAD is not a boolean, ignoring"),
            }
        }

        config
    }

    pub fn ability_progress_field(&self) -> Result<FieldPath, DomainError> {
        ability_progress_field(&self.module_id)
    }

    pub fn equipped_item_field(&self) -> Result<FieldPath, DomainError> {
        equipped_item_field(&self.module_id)
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]);
        assert_eq!(config.module_id, DEFAULT_MODULE_ID);
        assert_eq!(config.clock.size, DEFAULT_CLOCK_SIZE);
        assert_eq!(config.clock.theme, DEFAULT_CLOCK_THEME);
        assert!(!config.deep_cuts_load);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("BLADESHEET_MODULE_ID", "my-sheets"),
            ("BLADESHEET_CLOCK_THEME", "red"),
            ("BLADESHEET_DEFAULT_CLOCK_SIZE", " 8 "),
            ("BLADESHEET_DEEP_CUTS_LOAD", "TRUE"),
        ]);
        assert_eq!(
            config.equipped_item_field().unwrap().as_str(),
            "flags.my-sheets.equipped-items.{key}"
        );
        assert_eq!(config.clock.theme, "red");
        assert_eq!(config.clock.size, 8);
        assert!(config.deep_cuts_load);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let parsed = config(&[
            ("BLADESHEET_MODULE_ID", "bad.module"),
            ("BLADESHEET_DEFAULT_CLOCK_SIZE", "40"),
            ("BLADESHEET_DEEP_CUTS_LOAD", "maybe"),
            ("BLADESHEET_CLOCK_THEME", "   "),
        ]);
        assert_eq!(parsed, EngineConfig::default());

        let parsed = config(&[("BLADESHEET_DEFAULT_CLOCK_SIZE", "six")]);
        assert_eq!(parsed.clock.size, DEFAULT_CLOCK_SIZE);
    }
}
