//! Per-view sheet UI state.
//!
//! Panel and edit flags live for the session only; filter toggles are
//! written through to the [`UiStateStore`] so they survive a reload.

use std::sync::Arc;

use bladesheet_domain::ViewState;
use dashmap::DashMap;

use crate::infrastructure::ports::{StoreError, UiStateStore};

pub struct ViewStateService {
    store: Arc<dyn UiStateStore>,
    sessions: DashMap<String, ViewState>,
}

impl ViewStateService {
    pub fn new(store: Arc<dyn UiStateStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// Current state of `view`. Falls back to defaults when nothing is
    /// stored or the store cannot be read.
    pub async fn state(&self, view: &str) -> ViewState {
        if let Some(state) = self.sessions.get(view) {
            return *state;
        }
        let state = match self.store.load(view).await {
            Ok(Some(persisted)) => ViewState::from_persisted(&persisted),
            Ok(None) => ViewState::default(),
            Err(e) => {
                tracing::warn!(view, error = %e, "Could not load view state; using defaults");
                ViewState::default()
            }
        };
        *self.sessions.entry(view.to_string()).or_insert(state)
    }

    /// Apply `transition` to the state of `view` and return the result.
    ///
    /// The store is only written when a persisted flag changed. The new
    /// state stays in effect for the session even if that write fails.
    pub async fn apply<F>(&self, view: &str, transition: F) -> Result<ViewState, StoreError>
    where
        F: FnOnce(ViewState) -> ViewState,
    {
        let before = self.state(view).await;
        let after = transition(before);
        self.sessions.insert(view.to_string(), after);

        let persisted = after.persisted();
        if persisted != before.persisted() {
            self.store.save(view, persisted).await?;
            tracing::debug!(view, "Saved view state");
        }
        Ok(after)
    }

    /// Drop session flags for `view`; persisted flags are reloaded on next
    /// access.
    pub fn close(&self, view: &str) {
        self.sessions.remove(view);
    }
}
