//! Value codec: rendered markup ↔ `(capacity, value)`.
//!
//! [`render`] is the single rendering routine used by live sheets, notes
//! and historical projections. [`encode`] produces the idempotent set of
//! marker changes that moves a rendered control to a value. [`decode`]
//! reconstructs state from markup and is only needed for markup the engine
//! did not build itself (pasted references, externally injected clocks); it
//! fails soft to zero.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blades::DEFAULT_CLOCK_THEME;
use crate::control::{ControlStyle, ProgressControl};

static FACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)clock_(\d+)\.").expect("valid regex"));
static LEGACY_FACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)-(\d+)\.").expect("valid regex"));
static THEME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"themes/([^/]+)/").expect("valid regex"));

const FACE_ROOT: &str = "systems/blades-in-the-dark/themes";

// =============================================================================
// Rendered representation
// =============================================================================

/// What the rendering substrate exposes for one control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedControl {
    pub style: ControlStyle,
    /// Explicit zero-state marker; `None` for checkbox runs.
    pub zero_marker: Option<bool>,
    /// Segment markers in order; index 0 is segment 1.
    pub segments: Vec<bool>,
    /// Clock face image path.
    pub face: Option<String>,
    /// Clock state class (`clock-<capacity>-<value>`).
    pub state_class: Option<String>,
    /// Historical projection; activation events are ignored.
    #[serde(default)]
    pub snapshot: bool,
    #[serde(default)]
    pub label: Option<String>,
    /// Input name the field path is derived from.
    #[serde(default)]
    pub name: Option<String>,
}

impl RenderedControl {
    pub fn blank(style: ControlStyle, capacity: u32) -> Self {
        let zero_marker = style.is_radio().then_some(false);
        Self {
            style,
            zero_marker,
            segments: vec![false; capacity as usize],
            face: None,
            state_class: None,
            snapshot: false,
            label: None,
            name: None,
        }
    }
}

/// State reconstructed from markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    pub capacity: u32,
    pub value: u32,
    /// Auxiliary tag carried by the markup (clock theme).
    pub tag: Option<String>,
}

/// Why markup could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("control has no segments")]
    NoSegments,
    #[error("value {value} exceeds capacity {capacity}")]
    ValueOutOfRange { value: u32, capacity: u32 },
}

// =============================================================================
// Clock faces
// =============================================================================

/// Themed clock face image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockFace {
    pub theme: String,
    pub capacity: u32,
    pub value: u32,
}

impl ClockFace {
    pub fn path(&self) -> String {
        format!(
            "{FACE_ROOT}/{}/{}clock_{}.svg",
            self.theme, self.capacity, self.value
        )
    }

    /// Parse a face path. Accepts `<n>clock_<v>.` and the legacy `<n>-<v>.`
    /// naming; a path without a theme directory is assumed to be the
    /// default theme.
    pub fn parse(path: &str) -> Option<Self> {
        let caps = FACE_PATTERN
            .captures(path)
            .or_else(|| LEGACY_FACE_PATTERN.captures(path))?;
        let capacity = caps.get(1)?.as_str().parse().ok()?;
        let value = caps.get(2)?.as_str().parse().ok()?;
        let theme = THEME_PATTERN
            .captures(path)
            .and_then(|c| c.get(1))
            .map_or(DEFAULT_CLOCK_THEME, |m| m.as_str())
            .to_string();
        Some(Self {
            theme,
            capacity,
            value,
        })
    }
}

pub fn state_class(capacity: u32, value: u32) -> String {
    format!("clock-{capacity}-{value}")
}

// =============================================================================
// Deltas
// =============================================================================

/// One marker change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum RenderChange {
    Segment { index: usize, marked: bool },
    ZeroMarker { marked: bool },
    Face { path: String },
    StateClass { class: String },
}

/// Set of marker changes moving a rendered control to a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderDelta {
    changes: Vec<RenderChange>,
}

impl RenderDelta {
    pub fn changes(&self) -> &[RenderChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Apply every change. Applying the same delta twice is a no-op.
    pub fn apply(&self, target: &mut RenderedControl) {
        for change in &self.changes {
            match change {
                RenderChange::Segment { index, marked } => {
                    if *index >= target.segments.len() {
                        target.segments.resize(index + 1, false);
                    }
                    target.segments[*index] = *marked;
                }
                RenderChange::ZeroMarker { marked } => target.zero_marker = Some(*marked),
                RenderChange::Face { path } => target.face = Some(path.clone()),
                RenderChange::StateClass { class } => target.state_class = Some(class.clone()),
            }
        }
    }

    /// Drop changes that `current` already satisfies.
    pub fn minimized_against(self, current: &RenderedControl) -> Self {
        let changes = self
            .changes
            .into_iter()
            .filter(|change| match change {
                RenderChange::Segment { index, marked } => {
                    current.segments.get(*index) != Some(marked)
                }
                RenderChange::ZeroMarker { marked } => current.zero_marker != Some(*marked),
                RenderChange::Face { path } => current.face.as_deref() != Some(path.as_str()),
                RenderChange::StateClass { class } => {
                    current.state_class.as_deref() != Some(class.as_str())
                }
            })
            .collect();
        Self { changes }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Changes that bring every marker of a `style` control to `value`.
pub fn encode(style: &ControlStyle, capacity: u32, value: u32) -> RenderDelta {
    let value = value.min(capacity);
    let radio = style.is_radio();
    let mut changes: Vec<RenderChange> = (1..=capacity)
        .map(|segment| RenderChange::Segment {
            index: (segment - 1) as usize,
            marked: if radio {
                segment == value
            } else {
                segment <= value
            },
        })
        .collect();

    if radio {
        changes.push(RenderChange::ZeroMarker { marked: value == 0 });
    }

    if let ControlStyle::Clock { theme } = style {
        let face = ClockFace {
            theme: theme.clone(),
            capacity,
            value,
        };
        changes.push(RenderChange::Face { path: face.path() });
        changes.push(RenderChange::StateClass {
            class: state_class(capacity, value),
        });
    }

    RenderDelta { changes }
}

/// Reconstruct `(capacity, value)` from markup.
///
/// A clock face is authoritative when present. Otherwise the value is the
/// position of the last marked segment, which reads both radio runs (one
/// marker) and checkbox runs (a filled prefix); no marked segment, or a
/// marked zero marker alone, means zero.
pub fn try_decode(rendered: &RenderedControl) -> Result<Decoded, DecodeError> {
    if let Some(face) = rendered.face.as_deref().and_then(ClockFace::parse) {
        if face.value > face.capacity {
            return Err(DecodeError::ValueOutOfRange {
                value: face.value,
                capacity: face.capacity,
            });
        }
        if face.capacity > 0 {
            return Ok(Decoded {
                capacity: face.capacity,
                value: face.value,
                tag: Some(face.theme),
            });
        }
    }

    if rendered.segments.is_empty() {
        return Err(DecodeError::NoSegments);
    }

    let capacity = rendered.segments.len() as u32;
    let value = rendered
        .segments
        .iter()
        .rposition(|marked| *marked)
        .map_or(0, |index| index as u32 + 1);

    Ok(Decoded {
        capacity,
        value,
        tag: rendered.style.theme().map(str::to_string),
    })
}

/// Fail-soft decode: malformed markup reads as value 0.
pub fn decode(rendered: &RenderedControl) -> Decoded {
    try_decode(rendered).unwrap_or_else(|_| Decoded {
        capacity: rendered.segments.len() as u32,
        value: 0,
        tag: rendered.style.theme().map(str::to_string),
    })
}

/// Render a control. Shared by live and historical paths.
pub fn render(control: &ProgressControl) -> RenderedControl {
    let mut rendered = RenderedControl::blank(control.style().clone(), control.capacity());
    encode(control.style(), control.capacity(), control.value()).apply(&mut rendered);
    rendered.snapshot = !control.is_interactive();
    rendered.label = control.label().map(str::to_string);
    rendered.name = Some(control.field_path().to_string());
    rendered
}
