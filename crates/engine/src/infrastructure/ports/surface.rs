//! Rendering substrate and user-facing notifications.

use bladesheet_domain::{ControlId, DocumentRef, LoadTally, RenderDelta, RenderedControl};

/// Rendered controls, addressed by the id they were mounted under.
///
/// Calls are synchronous: optimistic updates are applied before any
/// suspension point.
#[cfg_attr(test, mockall::automock)]
pub trait RenderSurface: Send + Sync {
    fn mount(&self, control: ControlId, rendered: RenderedControl);
    fn unmount(&self, control: ControlId);
    fn rendered(&self, control: ControlId) -> Option<RenderedControl>;
    fn apply(&self, control: ControlId, delta: &RenderDelta);

    fn load_tally(&self, owner: &DocumentRef) -> Option<LoadTally>;
    fn set_load_tally(&self, owner: &DocumentRef, tally: LoadTally);
}

/// Transient, non-fatal warnings shown to the user.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn warn(&self, message: &str);
}
