//! In-memory rendering substrate and notifier.

use std::sync::Mutex;

use bladesheet_domain::{ControlId, DocumentRef, LoadTally, RenderDelta, RenderedControl};
use dashmap::DashMap;

use crate::infrastructure::ports::{Notifier, RenderSurface};

/// Rendered controls held in memory; deltas are applied in place.
#[derive(Default)]
pub struct InMemorySurface {
    controls: DashMap<ControlId, RenderedControl>,
    tallies: DashMap<DocumentRef, LoadTally>,
}

impl InMemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

impl RenderSurface for InMemorySurface {
    fn mount(&self, control: ControlId, rendered: RenderedControl) {
        self.controls.insert(control, rendered);
    }

    fn unmount(&self, control: ControlId) {
        self.controls.remove(&control);
    }

    fn rendered(&self, control: ControlId) -> Option<RenderedControl> {
        self.controls.get(&control).map(|r| r.clone())
    }

    fn apply(&self, control: ControlId, delta: &RenderDelta) {
        if let Some(mut rendered) = self.controls.get_mut(&control) {
            delta.apply(&mut rendered);
        }
    }

    fn load_tally(&self, owner: &DocumentRef) -> Option<LoadTally> {
        self.tallies.get(owner).map(|t| *t)
    }

    fn set_load_tally(&self, owner: &DocumentRef, tally: LoadTally) {
        self.tallies.insert(owner.clone(), tally);
    }
}

/// Notifier that logs each warning and keeps it for inspection.
#[derive(Default)]
pub struct LogNotifier {
    messages: Mutex<Vec<String>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl Notifier for LogNotifier {
    fn warn(&self, message: &str) {
        tracing::warn!(message, "User warning");
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bladesheet_domain::{encode, ControlStyle};

    #[test]
    fn deltas_apply_to_mounted_controls_only() {
        let surface = InMemorySurface::new();
        let id = ControlId::new();
        surface.mount(id, RenderedControl::blank(ControlStyle::Slots, 3));

        surface.apply(id, &encode(&ControlStyle::Slots, 3, 2));
        surface.apply(ControlId::new(), &encode(&ControlStyle::Slots, 3, 3));

        let rendered = surface.rendered(id).unwrap();
        assert_eq!(rendered.segments, vec![true, true, false]);
        assert_eq!(surface.len(), 1);

        surface.unmount(id);
        assert!(surface.is_empty());
    }

    #[test]
    fn notifier_keeps_messages() {
        let notifier = LogNotifier::new();
        notifier.warn("Could not save Stress");
        assert_eq!(notifier.messages(), vec!["Could not save Stress".to_string()]);
    }
}
