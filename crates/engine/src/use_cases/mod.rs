//! Use cases - progress control orchestration.
//!
//! - `sync`: registry, optimistic activation and persistence of controls
//! - `snapshot`: record hooks freezing and projecting clock values
//! - `lifecycle`: cleanup after owned resources disappear
//! - `view_state`: per-view sheet UI flags

pub mod lifecycle;
pub mod snapshot;
pub mod sync;
pub mod view_state;

pub use lifecycle::ResourceLifecycle;
pub use snapshot::{ProjectedControl, SnapshotProjector};
pub use sync::{
    ActivationOutcome, CapacitySource, ControlInstance, ControlRegistry, ControlSpec, Settlement,
    SyncController, SyncError, ThresholdOutcome,
};
pub use view_state::ViewStateService;
