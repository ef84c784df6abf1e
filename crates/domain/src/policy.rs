//! Toggle policy shared by every progress control family.
//!
//! Clicking a filled segment rolls the value back to just before it;
//! clicking an empty segment fills up to and including it. Binary toggles,
//! multi-slot abilities and clocks only differ in capacity. Grouped controls
//! are the binary case scaled by the group's cost.

use serde::{Deserialize, Serialize};

/// A user interaction with a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Activation {
    /// Primary activation of segment `segment` (1-based).
    Segment { segment: u32 },
    /// Secondary interaction: lower the value by one.
    Decrement,
}

/// Value after activating `clicked_segment` on a control holding
/// `current_value` out of `capacity`. Always within `[0, capacity]`.
pub fn next_value(clicked_segment: u32, current_value: u32, capacity: u32) -> u32 {
    let current = current_value.min(capacity);
    let next = if clicked_segment <= current {
        clicked_segment.saturating_sub(1)
    } else {
        clicked_segment
    };
    next.min(capacity)
}

/// Value after a secondary decrement; never below zero.
pub fn decrement(current_value: u32, capacity: u32) -> u32 {
    current_value.min(capacity).saturating_sub(1)
}

/// Value after activating any member of an all-or-nothing group of `cost`
/// units: the binary toggle (capacity 1) scaled to the group.
pub fn group_toggle(current_value: u32, cost: u32) -> u32 {
    let owned = u32::from(current_value > 0);
    next_value(1, owned, 1) * cost
}

/// Resolve an activation against a control's current state.
pub fn resolve(activation: Activation, current_value: u32, capacity: u32, grouped: bool) -> u32 {
    match activation {
        Activation::Decrement if grouped => 0,
        Activation::Decrement => decrement(current_value, capacity),
        Activation::Segment { .. } if grouped => group_toggle(current_value, capacity),
        Activation::Segment { segment } => next_value(segment, current_value, capacity),
    }
}
