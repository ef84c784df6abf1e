//! Frozen progress values embedded in historical records.
//!
//! When a chat record is created, every reference link it carries gets the
//! referenced clock's current value appended to its label
//! (`@UUID[Actor.c1]{Alarm|snapshot:3}`). Rendering that record later
//! builds a read-only control from the frozen value and never consults the
//! live document's value again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blades::ClockState;
use crate::control::ProgressControl;
use crate::error::DomainError;
use crate::ids::RecordId;
use crate::reference::{parse_links, DocumentRef, ReferenceLink};

/// Where a record is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Chat history: values are frozen at creation.
    Chat,
    /// Notes and journal pages: clocks stay live and interactive.
    Journal,
}

/// A record whose text payload may reference progress-bearing documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl HistoricalRecord {
    pub fn new(kind: RecordKind, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            kind,
            content: content.into(),
            created_at,
        }
    }

    pub fn links(&self) -> Vec<ReferenceLink> {
        parse_links(&self.content)
    }

    /// Snapshots embedded in this record, in order of appearance.
    pub fn snapshots(&self) -> Vec<HistoricalSnapshot> {
        self.links()
            .into_iter()
            .filter_map(|link| HistoricalSnapshot::from_link(&link, self.created_at))
            .collect()
    }
}

/// Immutable value captured for one reference when its record was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSnapshot {
    pub owner: DocumentRef,
    pub label: String,
    pub value: u32,
    pub captured_at: DateTime<Utc>,
}

impl HistoricalSnapshot {
    pub fn from_link(link: &ReferenceLink, captured_at: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            owner: link.target.clone(),
            label: link.label.clone(),
            value: link.snapshot?,
            captured_at,
        })
    }
}

/// Embed the current value of every referenced document into `content`.
///
/// `current_value` returns `None` for references that cannot be resolved or
/// carry no progress value; those links are left exactly as they were, as
/// are links that already hold a snapshot.
pub fn capture_snapshot<F>(content: &str, mut current_value: F) -> String
where
    F: FnMut(&DocumentRef) -> Option<u32>,
{
    let mut captured = String::with_capacity(content.len());
    let mut cursor = 0;
    for link in parse_links(content) {
        if link.snapshot.is_some() {
            continue;
        }
        let Some(value) = current_value(&link.target) else {
            continue;
        };
        captured.push_str(&content[cursor..link.span.start]);
        captured.push_str(&link.with_snapshot(value).to_markup());
        cursor = link.span.end;
    }
    captured.push_str(&content[cursor..]);
    captured
}

/// Build the read-only control for a frozen snapshot.
///
/// Capacity and theme come from the referenced clock; the value is the
/// snapshot's, clamped to the clock's current capacity.
pub fn project_from_snapshot(
    snapshot: &HistoricalSnapshot,
    clock: &ClockState,
) -> Result<ProgressControl, DomainError> {
    let control = clock.control_with_value(snapshot.owner.clone(), snapshot.value)?;
    let control = if snapshot.label.trim().is_empty() {
        control
    } else {
        control.with_label(snapshot.label.clone())
    };
    Ok(control.read_only())
}
