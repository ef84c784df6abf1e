//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Owning documents (host actor/item store)
//! - The rendering substrate and user notifications
//! - Per-view UI state persistence
//! - Clock (for testing)

mod error;
mod store;
mod surface;
mod testing;

pub use error::StoreError;
pub use store::{DocumentStore, UiStateStore, WriteOptions};
pub use surface::{Notifier, RenderSurface};
pub use testing::ClockPort;

#[cfg(test)]
pub use store::{MockDocumentStore, MockUiStateStore};
#[cfg(test)]
pub use surface::{MockNotifier, MockRenderSurface};
#[cfg(test)]
pub use testing::MockClockPort;
