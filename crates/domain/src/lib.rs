pub mod blades;
pub mod codec;
pub mod control;
pub mod document;
pub mod error;
pub mod ids;
pub mod policy;
pub mod reference;
pub mod snapshot;
pub mod view_state;

pub use error::DomainError;

// Re-export ID types
pub use ids::{ControlId, GroupId, RecordId, ResourceId};

// Re-export the progress control model
pub use control::{
    ControlStyle, CostRule, Crossing, ProgressControl, ResourceTarget, ThresholdBinding,
};
pub use document::{Document, DocumentKind, OwnedResource, ResourceKind};
pub use reference::{parse_links, DocumentRef, FieldPath, ReferenceLink};

// Re-export the pure progress surface
pub use codec::{
    decode, encode, render, try_decode, ClockFace, DecodeError, Decoded, RenderChange,
    RenderDelta, RenderedControl,
};
pub use policy::{next_value, Activation};
pub use snapshot::{
    capture_snapshot, project_from_snapshot, HistoricalRecord, HistoricalSnapshot, RecordKind,
};

// Re-export Blades rules and view state
pub use blades::{ClockDefaults, ClockState, LoadLevel, LoadTally};
pub use view_state::{Filter, Panel, ViewState};
