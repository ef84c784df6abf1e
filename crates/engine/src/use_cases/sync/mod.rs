//! Optimistic progress control sync.
//!
//! An activation is resolved against the value currently on screen, the
//! resulting render delta is applied to the surface before anything else
//! happens, and only then is persistence handed to a background task:
//!
//! 1. threshold side effect (create/destroy the bound resource), at most
//!    once per toggle, grouped or not
//! 2. scoped single-field write with re-render suppressed
//! 3. on failure, re-read the document and revert the visual change
//!
//! Settlements of one control (or group) run one after another in arrival
//! order. Duplicate events for the same logical click are collapsed by the
//! [`PendingToggleGuard`].

mod error;
mod guard;
mod registry;
mod threshold;

pub use error::SyncError;
pub use guard::{GuardKey, PendingToggle, PendingToggleGuard};
pub use registry::{CapacitySource, ControlInstance, ControlRegistry, ControlSpec};
pub use threshold::ThresholdOutcome;

use std::sync::Arc;

use bladesheet_domain::blades::rendered_ability_progress;
use bladesheet_domain::policy::resolve;
use bladesheet_domain::{
    decode, encode, render, try_decode, Activation, ControlId, Document, DocumentRef,
    FieldPath, GroupId, ProgressControl, RenderedControl, ResourceId, ResourceTarget,
    ThresholdBinding,
};
use dashmap::{DashMap, DashSet};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::infrastructure::ports::{DocumentStore, Notifier, RenderSurface, WriteOptions};
use threshold::apply_threshold;

// =============================================================================
// Outcomes
// =============================================================================

/// Immediate result of an activation event.
#[derive(Debug)]
pub enum ActivationOutcome {
    /// The optimistic value is on screen; `settle` resolves once the write
    /// has been persisted or reverted. Dropping it leaves the write running.
    Applied {
        next_value: u32,
        settle: JoinHandle<Settlement>,
    },
    /// Duplicate of a toggle already applied in this render cycle.
    Suppressed,
    /// The activation does not change the value (decrement at zero).
    Unchanged,
    /// Historical projection; events are ignored.
    ReadOnly,
    /// No mounted control with this id.
    Unknown,
}

impl ActivationOutcome {
    pub fn next_value(&self) -> Option<u32> {
        match self {
            Self::Applied { next_value, .. } => Some(*next_value),
            _ => None,
        }
    }

    /// Wait for persistence, if anything was applied.
    pub async fn settled(self) -> Option<Settlement> {
        match self {
            Self::Applied { settle, .. } => match settle.await {
                Ok(settlement) => Some(settlement),
                Err(e) => {
                    tracing::warn!(error = %e, "Progress settlement task failed");
                    None
                }
            },
            _ => None,
        }
    }
}

/// How a toggle ended once persistence finished.
#[derive(Debug, Clone)]
pub enum Settlement {
    Settled {
        value: u32,
        threshold: ThresholdOutcome,
    },
    /// The optimistic change was undone; `value` is what is shown now.
    Reverted { value: u32, error: SyncError },
}

impl Settlement {
    pub fn value(&self) -> u32 {
        match self {
            Self::Settled { value, .. } | Self::Reverted { value, .. } => *value,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

/// Value a freshly mounted control shows for a stored value.
///
/// Owning the bound resource implies progress: at least one unit, or the
/// whole cost for all-or-nothing groups.
pub fn mounted_value(stored: u32, capacity: u32, owned: bool, grouped: bool) -> u32 {
    if grouped {
        if stored > 0 || owned {
            capacity
        } else {
            0
        }
    } else {
        rendered_ability_progress(stored, capacity, owned)
    }
}

// =============================================================================
// State
// =============================================================================

struct Mounted {
    view: String,
    control: ProgressControl,
    threshold: Option<ThresholdBinding>,
    affects_load: bool,
}

struct Group {
    view: String,
    owner: DocumentRef,
    field: FieldPath,
    cost: u32,
    value: u32,
    members: Vec<ControlId>,
    threshold: Option<ThresholdBinding>,
    resource: Option<ResourceTarget>,
    affects_load: bool,
    label: Option<String>,
}

/// One applied toggle on its way to the store.
struct Toggle {
    view: String,
    key: GuardKey,
    ticket: u64,
    owner: DocumentRef,
    field: FieldPath,
    capacity: u32,
    previous: u32,
    next: u32,
    threshold: Option<(ThresholdBinding, ResourceTarget)>,
    affects_load: bool,
    label: String,
}

/// Tail of the settlement queue of one key.
struct Lane {
    ticket: u64,
    /// Resolves once the latest queued settlement has finished.
    finished: oneshot::Receiver<()>,
}

struct SyncState {
    store: Arc<dyn DocumentStore>,
    surface: Arc<dyn RenderSurface>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<ControlRegistry>,
    guard: PendingToggleGuard,
    controls: DashMap<ControlId, Mounted>,
    groups: DashMap<GroupId, Group>,
    lanes: DashMap<GuardKey, Lane>,
    /// Owners already reported unresolvable, per view.
    unresolved: DashSet<(String, DocumentRef)>,
}

// =============================================================================
// Controller
// =============================================================================

/// Mounts progress controls and syncs their activations to the store.
#[derive(Clone)]
pub struct SyncController {
    state: Arc<SyncState>,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        surface: Arc<dyn RenderSurface>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<ControlRegistry>,
    ) -> Self {
        Self {
            state: Arc::new(SyncState {
                store,
                surface,
                notifier,
                registry,
                guard: PendingToggleGuard::new(),
                controls: DashMap::new(),
                groups: DashMap::new(),
                lanes: DashMap::new(),
                unresolved: DashSet::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.state.registry
    }

    pub fn guard(&self) -> &PendingToggleGuard {
        &self.state.guard
    }

    /// Start a new render cycle for `view`: its controls are discarded and
    /// their pending toggles forgotten.
    pub fn begin_render(&self, view: &str) {
        let count = self.end_render(view);
        tracing::debug!(view, controls = count, "Began render cycle");
    }

    /// Unmount everything `view` mounted, for views that are gone for good
    /// (a record scrolled out or deleted). In-flight writes still land.
    /// Returns the number of controls dropped.
    pub fn end_render(&self, view: &str) -> usize {
        let state = &self.state;
        let controls: Vec<ControlId> = state
            .controls
            .iter()
            .filter(|m| m.view == view)
            .map(|m| *m.key())
            .collect();
        for id in &controls {
            state.controls.remove(id);
            state.surface.unmount(*id);
            state.guard.forget(GuardKey::Control(*id));
        }
        let groups: Vec<GroupId> = state
            .groups
            .iter()
            .filter(|g| g.view == view)
            .map(|g| *g.key())
            .collect();
        for id in &groups {
            state.groups.remove(id);
            state.guard.forget(GuardKey::Group(*id));
        }
        state.unresolved.retain(|(seen_in, _)| seen_in != view);
        controls.len()
    }

    /// Resolve `owner` and mount one control per instance.
    ///
    /// A document that cannot be resolved mounts nothing.
    pub async fn mount(
        &self,
        view: &str,
        selector: &str,
        owner: &DocumentRef,
        instances: &[ControlInstance],
    ) -> Result<Vec<ControlId>, SyncError> {
        match self.state.store.resolve(owner).await {
            Ok(Some(document)) => self.mount_document(view, selector, &document, instances),
            Ok(None) => {
                self.state.warn_unresolved(view, owner);
                Ok(Vec::new())
            }
            Err(e) if e.is_not_found() => {
                self.state.warn_unresolved(view, owner);
                Ok(Vec::new())
            }
            Err(e) => Err(SyncError::Persistence(e)),
        }
    }

    /// Mount the controls of an already resolved document.
    ///
    /// Values come from the document itself; markup is never read back.
    /// Grouped specs mount one single-unit member per unit of cost.
    pub fn mount_document(
        &self,
        view: &str,
        selector: &str,
        document: &Document,
        instances: &[ControlInstance],
    ) -> Result<Vec<ControlId>, SyncError> {
        let spec = self.state.registry.get(selector)?;
        let mut mounted = Vec::new();

        for instance in instances {
            let field = instance.field_path(&spec)?;
            let Some(capacity) = spec.capacity_for(document, &instance.entity) else {
                tracing::warn!(
                    selector,
                    owner = %document.reference,
                    field = %field,
                    "Capacity unavailable, control not mounted"
                );
                continue;
            };

            let resource = instance.resource.clone().map(|mut target| {
                if let Some(binding) = &spec.threshold {
                    target.owned_id = document
                        .find_resource(binding.resource_kind, &target.source_key)
                        .map(|r| r.id);
                }
                target
            });
            let owned = resource.as_ref().is_some_and(|r| r.owned_id.is_some());
            let stored = document.u32_at(&field).unwrap_or(0);
            let value = mounted_value(stored, capacity, owned, spec.grouped);

            if spec.grouped {
                let group_id = GroupId::new();
                let mut members = Vec::with_capacity(capacity as usize);
                for _ in 0..capacity {
                    let member = ProgressControl::new(
                        document.reference.clone(),
                        field.clone(),
                        1,
                        u32::from(value > 0),
                        spec.style.clone(),
                    )?
                    .with_group(group_id);
                    members.push(self.attach(view, member, None, false));
                }
                mounted.extend(members.iter().copied());
                self.state.groups.insert(
                    group_id,
                    Group {
                        view: view.to_string(),
                        owner: document.reference.clone(),
                        field,
                        cost: capacity,
                        value,
                        members,
                        threshold: spec.threshold.clone(),
                        resource,
                        affects_load: spec.affects_load,
                        label: instance.label.clone(),
                    },
                );
            } else {
                let mut control = ProgressControl::new(
                    document.reference.clone(),
                    field,
                    capacity,
                    value,
                    spec.style.clone(),
                )?;
                if let Some(label) = &instance.label {
                    control = control.with_label(label.clone());
                }
                if let Some(resource) = resource {
                    control = control.with_resource(resource);
                }
                mounted.push(self.attach(
                    view,
                    control,
                    spec.threshold.clone(),
                    spec.affects_load,
                ));
            }
        }

        tracing::debug!(view, selector, owner = %document.reference, count = mounted.len(), "Mounted progress controls");
        Ok(mounted)
    }

    /// Render `control` through the shared codec and track it.
    pub fn attach(
        &self,
        view: &str,
        control: ProgressControl,
        threshold: Option<ThresholdBinding>,
        affects_load: bool,
    ) -> ControlId {
        let id = control.id();
        self.state.surface.mount(id, render(&control));
        self.state.controls.insert(
            id,
            Mounted {
                view: view.to_string(),
                control,
                threshold,
                affects_load,
            },
        );
        id
    }

    /// Track markup the engine did not build (pasted references, injected
    /// clocks). State is decoded from the markup, failing soft to zero, and
    /// the written field is derived from the input name.
    pub fn adopt_rendered(
        &self,
        view: &str,
        id: ControlId,
        owner: DocumentRef,
    ) -> Result<u32, SyncError> {
        let rendered = self
            .state
            .surface
            .rendered(id)
            .ok_or(SyncError::UnknownControl(id))?;
        let decoded = try_decode(&rendered).unwrap_or_else(|e| {
            tracing::debug!(control = %id, error = %SyncError::from(e), "Decoding fell back to zero");
            decode(&rendered)
        });
        if decoded.capacity == 0 {
            return Err(SyncError::UnknownControl(id));
        }
        let field = rendered
            .name
            .as_deref()
            .map_or_else(FieldPath::default, FieldPath::from_input_name);

        let mut control = ProgressControl::new(
            owner,
            field,
            decoded.capacity,
            decoded.value,
            rendered.style.clone(),
        )?
        .with_id(id);
        if let Some(label) = rendered.label.clone() {
            control = control.with_label(label);
        }
        if rendered.snapshot {
            control = control.read_only();
        }
        self.state.controls.insert(
            id,
            Mounted {
                view: view.to_string(),
                control,
                threshold: None,
                affects_load: false,
            },
        );
        Ok(decoded.value)
    }

    /// Handle one activation event. Must be called within a Tokio runtime.
    ///
    /// The optimistic render delta is applied before this returns; the
    /// persistence task runs in the background.
    pub fn activate(&self, id: ControlId, activation: Activation) -> ActivationOutcome {
        let state = &self.state;
        let Some((view, control, threshold, affects_load)) = state.controls.get(&id).map(|m| {
            (
                m.view.clone(),
                m.control.clone(),
                m.threshold.clone(),
                m.affects_load,
            )
        }) else {
            tracing::debug!(control = %id, "Activation on unknown control");
            return ActivationOutcome::Unknown;
        };

        let rendered = state.surface.rendered(id);
        if !control.is_interactive() || rendered.as_ref().is_some_and(|r| r.snapshot) {
            return ActivationOutcome::ReadOnly;
        }

        let prepared = match control.group_id() {
            Some(group_id) => state.prepare_group(group_id, rendered, activation),
            None => {
                state.prepare_single(view, &control, rendered, threshold, affects_load, activation)
            }
        };
        let toggle = match prepared {
            Ok(toggle) => toggle,
            Err(outcome) => return outcome,
        };

        state.show(toggle.key, toggle.next);
        if toggle.affects_load {
            state.shift_load(&toggle.owner, delta(toggle.previous, toggle.next));
        }
        tracing::debug!(
            owner = %toggle.owner,
            field = %toggle.field,
            from = toggle.previous,
            to = toggle.next,
            "Applied optimistic toggle"
        );

        let next_value = toggle.next;
        let (key, ticket) = (toggle.key, toggle.ticket);
        let (done, finished) = oneshot::channel::<()>();
        let ahead = state.lanes.insert(key, Lane { ticket, finished });

        let task_state = Arc::clone(&self.state);
        let settle = tokio::spawn(async move {
            if let Some(ahead) = ahead {
                // a dropped sender also means the earlier settlement is over
                let _ = ahead.finished.await;
            }
            let settlement = task_state.settle(toggle).await;
            task_state
                .lanes
                .remove_if(&key, |_, lane| lane.ticket == ticket);
            drop(done);
            settlement
        });
        ActivationOutcome::Applied { next_value, settle }
    }

    pub fn value(&self, id: ControlId) -> Option<u32> {
        self.state.controls.get(&id).map(|m| m.control.value())
    }

    pub fn control(&self, id: ControlId) -> Option<ProgressControl> {
        self.state.controls.get(&id).map(|m| m.control.clone())
    }

    pub fn group_value(&self, id: GroupId) -> Option<u32> {
        self.state.groups.get(&id).map(|g| g.value)
    }

    pub fn controls_in(&self, view: &str) -> Vec<ControlId> {
        self.state
            .controls
            .iter()
            .filter(|m| m.view == view)
            .map(|m| *m.key())
            .collect()
    }
}

fn delta(from: u32, to: u32) -> i64 {
    i64::from(to) - i64::from(from)
}

/// Value shown by `rendered`, read through the codec. The model value is
/// only used when nothing is rendered.
fn shown_value(rendered: Option<&RenderedControl>, capacity: u32, model: u32) -> u32 {
    rendered.map_or(model, |r| decode(r).value.min(capacity))
}

impl SyncState {
    fn prepare_single(
        &self,
        view: String,
        control: &ProgressControl,
        rendered: Option<RenderedControl>,
        threshold: Option<ThresholdBinding>,
        affects_load: bool,
        activation: Activation,
    ) -> Result<Toggle, ActivationOutcome> {
        let key = GuardKey::Control(control.id());
        let capacity = control.capacity();
        if self
            .guard
            .is_duplicate(key, |base| resolve(activation, base, capacity, false))
        {
            tracing::debug!(control = %control.id(), "Suppressed duplicate activation");
            return Err(ActivationOutcome::Suppressed);
        }

        let previous = shown_value(rendered.as_ref(), capacity, control.value());
        let next = resolve(activation, previous, capacity, false);
        if next == previous {
            return Err(ActivationOutcome::Unchanged);
        }

        Ok(Toggle {
            view,
            key,
            ticket: self.guard.arm(key, previous, next),
            owner: control.owner().clone(),
            field: control.field_path().clone(),
            capacity,
            previous,
            next,
            threshold: threshold.zip(control.resource().cloned()),
            affects_load,
            label: control
                .label()
                .map_or_else(|| control.field_path().to_string(), str::to_string),
        })
    }

    /// Members are single-unit, so any member's marker stands for the
    /// whole cost.
    fn prepare_group(
        &self,
        group_id: GroupId,
        rendered: Option<RenderedControl>,
        activation: Activation,
    ) -> Result<Toggle, ActivationOutcome> {
        let Some(group) = self.groups.get(&group_id) else {
            return Err(ActivationOutcome::Unknown);
        };
        let key = GuardKey::Group(group_id);
        if self
            .guard
            .is_duplicate(key, |base| resolve(activation, base, group.cost, true))
        {
            tracing::debug!(group = %group_id, "Suppressed duplicate group activation");
            return Err(ActivationOutcome::Suppressed);
        }

        let filled = shown_value(rendered.as_ref(), 1, u32::from(group.value > 0));
        let previous = filled * group.cost;
        let next = resolve(activation, previous, group.cost, true);
        if next == previous {
            return Err(ActivationOutcome::Unchanged);
        }

        Ok(Toggle {
            view: group.view.clone(),
            key,
            ticket: self.guard.arm(key, previous, next),
            owner: group.owner.clone(),
            field: group.field.clone(),
            capacity: group.cost,
            previous,
            next,
            threshold: group.threshold.clone().zip(group.resource.clone()),
            affects_load: group.affects_load,
            label: group
                .label
                .clone()
                .unwrap_or_else(|| group.field.to_string()),
        })
    }

    /// Move the model and the rendered markers of `key` to `value`.
    fn show(&self, key: GuardKey, value: u32) {
        match key {
            GuardKey::Control(id) => self.show_control(id, value),
            GuardKey::Group(id) => {
                let members = match self.groups.get_mut(&id) {
                    Some(mut group) => {
                        group.value = value.min(group.cost);
                        group.members.clone()
                    }
                    None => return,
                };
                let filled = u32::from(value > 0);
                for member in members {
                    self.show_control(member, filled);
                }
            }
        }
    }

    fn show_control(&self, id: ControlId, value: u32) {
        let delta = {
            let Some(mut mounted) = self.controls.get_mut(&id) else {
                return;
            };
            let value = mounted.control.set_value(value);
            encode(mounted.control.style(), mounted.control.capacity(), value)
        };
        let delta = match self.surface.rendered(id) {
            Some(current) => delta.minimized_against(&current),
            None => delta,
        };
        if !delta.is_empty() {
            self.surface.apply(id, &delta);
        }
    }

    fn set_owned_resource(&self, key: GuardKey, owned_id: Option<ResourceId>) {
        match key {
            GuardKey::Control(id) => {
                if let Some(mut mounted) = self.controls.get_mut(&id) {
                    mounted.control.set_owned_resource(owned_id);
                }
            }
            GuardKey::Group(id) => {
                if let Some(mut group) = self.groups.get_mut(&id) {
                    if let Some(resource) = group.resource.as_mut() {
                        resource.owned_id = owned_id;
                    }
                }
            }
        }
    }

    fn shift_load(&self, owner: &DocumentRef, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(tally) = self.surface.load_tally(owner) {
            self.surface.set_load_tally(owner, tally.adjusted(delta));
        }
    }

    fn warn_unresolved(&self, view: &str, owner: &DocumentRef) {
        if self.unresolved.insert((view.to_string(), owner.clone())) {
            tracing::warn!(view, owner = %owner, "Owning document could not be resolved");
        }
    }

    /// A later toggle on the same key is queued behind this one and owns
    /// what is on screen.
    fn is_superseded(&self, toggle: &Toggle) -> bool {
        self.lanes
            .get(&toggle.key)
            .is_some_and(|lane| lane.ticket != toggle.ticket)
    }

    fn shown(&self, key: GuardKey) -> Option<u32> {
        match key {
            GuardKey::Control(id) => self.controls.get(&id).map(|m| m.control.value()),
            GuardKey::Group(id) => self.groups.get(&id).map(|g| g.value),
        }
    }

    async fn settle(&self, toggle: Toggle) -> Settlement {
        let document = match self.store.resolve(&toggle.owner).await {
            Ok(Some(document)) => document,
            Ok(None) => return self.abandon(toggle),
            Err(e) if e.is_not_found() => return self.abandon(toggle),
            Err(e) => return self.revert(toggle, SyncError::Persistence(e)).await,
        };

        let threshold = match &toggle.threshold {
            Some((binding, target)) => {
                apply_threshold(
                    self.store.as_ref(),
                    &document,
                    binding,
                    target,
                    toggle.previous,
                    toggle.next,
                )
                .await
            }
            None => Ok(ThresholdOutcome::Untouched),
        };
        let threshold = match threshold {
            Ok(outcome) => outcome,
            Err(error) => return self.revert(toggle, error).await,
        };
        match threshold {
            ThresholdOutcome::Created(id) => self.set_owned_resource(toggle.key, Some(id)),
            ThresholdOutcome::Destroyed(_) => self.set_owned_resource(toggle.key, None),
            _ => {}
        }

        let write = self
            .store
            .write_field(
                &toggle.owner,
                &toggle.field,
                json!(toggle.next),
                WriteOptions::quiet(),
            )
            .await;
        if let Err(e) = write {
            return self.revert(toggle, SyncError::Persistence(e)).await;
        }

        self.guard.release(toggle.key, toggle.ticket);
        tracing::debug!(owner = %toggle.owner, field = %toggle.field, value = toggle.next, "Toggle settled");
        Settlement::Settled {
            value: toggle.next,
            threshold,
        }
    }

    /// The owning document vanished: put the pre-toggle value back and
    /// drop the interaction without bothering the user.
    fn abandon(&self, toggle: Toggle) -> Settlement {
        self.warn_unresolved(&toggle.view, &toggle.owner);
        let value = self.restore(&toggle, toggle.previous);
        Settlement::Reverted {
            value,
            error: SyncError::Resolution(toggle.owner),
        }
    }

    /// Persistence failed: re-derive the value from the document (or the
    /// pre-toggle value when it is gone) and warn once.
    async fn revert(&self, toggle: Toggle, error: SyncError) -> Settlement {
        let document = self.store.resolve(&toggle.owner).await.ok().flatten();
        let value = match &document {
            Some(document) => {
                let stored = document.u32_at(&toggle.field).unwrap_or(0);
                let owned = toggle.threshold.as_ref().is_some_and(|(binding, target)| {
                    document
                        .find_resource(binding.resource_kind, &target.source_key)
                        .is_some()
                });
                let grouped = matches!(toggle.key, GuardKey::Group(_));
                mounted_value(stored, toggle.capacity, owned, grouped)
            }
            None => toggle.previous,
        };

        let value = self.restore(&toggle, value);
        tracing::warn!(
            owner = %toggle.owner,
            field = %toggle.field,
            error = %error,
            reverted_to = value,
            "Progress write failed, reverted"
        );
        self.notifier
            .warn(&format!("Could not save {}; the change was undone.", toggle.label));
        Settlement::Reverted { value, error }
    }

    /// Put `value` back on screen unless a later toggle on the same key
    /// has taken over. Returns what is shown afterwards.
    fn restore(&self, toggle: &Toggle, value: u32) -> u32 {
        self.guard.release(toggle.key, toggle.ticket);
        if self.is_superseded(toggle) {
            return self.shown(toggle.key).unwrap_or(value);
        }
        self.show(toggle.key, value);
        if toggle.affects_load {
            self.shift_load(&toggle.owner, delta(toggle.next, value));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::{InMemoryDocumentStore, ResourceCall};
    use crate::infrastructure::memory_surface::{InMemorySurface, LogNotifier};
    use crate::infrastructure::ports::{MockDocumentStore, MockNotifier, StoreError};
    use bladesheet_domain::blades::ability_cost_rule;
    use bladesheet_domain::{
        ControlStyle, CostRule, DocumentKind, LoadTally, ResourceKind, RenderedControl,
    };
    use serde_json::{json, Value};

    const MODULE: &str = "bitd-alternate-sheets";

    struct Harness {
        controller: SyncController,
        store: Arc<InMemoryDocumentStore>,
        surface: Arc<InMemorySurface>,
        notifier: Arc<LogNotifier>,
    }

    fn pc() -> DocumentRef {
        DocumentRef::new("Actor.pc1").unwrap()
    }

    fn path(p: &str) -> FieldPath {
        FieldPath::new(p).unwrap()
    }

    fn progress_field() -> FieldPath {
        path(&format!("flags.{MODULE}.multiAbilityProgress.{{key}}"))
    }

    fn character() -> Document {
        Document::new(pc(), DocumentKind::Character, "Silver").with_data(json!({
            "system": { "stress": { "value": 0, "max": 9 } },
            "flags": {}
        }))
    }

    fn registry() -> Arc<ControlRegistry> {
        let registry = ControlRegistry::new();
        registry
            .register_progress_control(
                "stress",
                ControlSpec::new(
                    path("system.stress.value"),
                    CapacitySource::Field(path("system.stress.max")),
                    ControlStyle::Track,
                ),
            )
            .unwrap();
        registry
            .register_progress_control(
                "ability",
                ControlSpec::new(
                    progress_field(),
                    CapacitySource::Cost(ability_cost_rule()),
                    ControlStyle::Slots,
                )
                .with_threshold(ThresholdBinding::new(
                    progress_field(),
                    ResourceKind::Ability,
                    ability_cost_rule(),
                )),
            )
            .unwrap();
        registry
            .register_progress_control(
                "grouped-ability",
                ControlSpec::new(
                    progress_field(),
                    CapacitySource::Cost(ability_cost_rule()),
                    ControlStyle::Slots,
                )
                .grouped()
                .with_threshold(ThresholdBinding::new(
                    progress_field(),
                    ResourceKind::Ability,
                    ability_cost_rule(),
                )),
            )
            .unwrap();
        let equipped = path(&format!("flags.{MODULE}.equipped-items.{{key}}"));
        registry
            .register_progress_control(
                "item",
                ControlSpec::new(
                    equipped,
                    CapacitySource::Cost(CostRule::Attribute {
                        paths: vec![path("system.load")],
                        fallback: 1,
                    }),
                    ControlStyle::Slots,
                )
                .grouped()
                .affecting_load(),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(character());
        let surface = Arc::new(InMemorySurface::new());
        let notifier = Arc::new(LogNotifier::new());
        let controller = SyncController::new(
            store.clone(),
            surface.clone(),
            notifier.clone(),
            registry(),
        );
        Harness {
            controller,
            store,
            surface,
            notifier,
        }
    }

    fn ability(name: &str, price: u32) -> ControlInstance {
        ControlInstance::keyed(name)
            .with_label(name)
            .with_entity(json!({ "system": { "price": price } }))
            .with_resource(ResourceTarget {
                kind: ResourceKind::Ability,
                source_key: name.to_string(),
                name: name.to_string(),
                owned_id: None,
                seed: Value::Null,
            })
    }

    fn segment(segment: u32) -> Activation {
        Activation::Segment { segment }
    }

    async fn mount_one(h: &Harness, selector: &str, instance: ControlInstance) -> Vec<ControlId> {
        h.controller
            .mount("sheet", selector, &pc(), &[instance])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn when_segment_clicked_then_view_updates_before_write() {
        let h = harness();
        let ids = mount_one(&h, "stress", ControlInstance::default()).await;
        let id = ids[0];

        let outcome = h.controller.activate(id, segment(2));
        assert_eq!(outcome.next_value(), Some(2));

        // nothing has been awaited yet
        let rendered = h.surface.rendered(id).unwrap();
        assert_eq!(decode(&rendered).value, 2);
        assert!(h.store.writes().await.is_empty());

        let settlement = outcome.settled().await.unwrap();
        assert!(settlement.is_settled());
        let writes = h.store.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value, json!(2));
        assert!(writes[0].options.suppress_rerender);
    }

    #[tokio::test]
    async fn when_duplicate_event_arrives_then_only_one_write() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];

        let first = h.controller.activate(id, segment(3));
        let second = h.controller.activate(id, segment(3));
        assert!(matches!(second, ActivationOutcome::Suppressed));

        first.settled().await.unwrap();
        assert_eq!(h.store.writes().await.len(), 1);
        assert_eq!(h.controller.value(id), Some(3));
    }

    #[tokio::test]
    async fn when_filled_segment_clicked_then_value_rolls_back() {
        let h = harness();
        h.store.update(&pc(), |doc| {
            doc.set_field(&path("system.stress.value"), json!(2));
        });
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];
        assert_eq!(h.controller.value(id), Some(2));

        let outcome = h.controller.activate(id, segment(2));
        assert_eq!(outcome.next_value(), Some(1));
        outcome.settled().await.unwrap();
        let stored = h.store.get(&pc()).unwrap().u32_at(&path("system.stress.value"));
        assert_eq!(stored, Some(1));
    }

    #[tokio::test]
    async fn when_decrementing_then_value_drops_by_one_and_stops_at_zero() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];
        assert!(matches!(
            h.controller.activate(id, Activation::Decrement),
            ActivationOutcome::Unchanged
        ));

        h.controller.activate(id, segment(3)).settled().await.unwrap();
        let outcome = h.controller.activate(id, Activation::Decrement);
        assert_eq!(outcome.next_value(), Some(2));
        outcome.settled().await.unwrap();
        assert_eq!(h.store.writes().await.len(), 2);
    }

    #[tokio::test]
    async fn when_grouped_member_toggled_then_whole_group_moves_with_one_resource_call() {
        let h = harness();
        let members = mount_one(&h, "grouped-ability", ability("Veteran", 3)).await;
        assert_eq!(members.len(), 3);
        let group = h.controller.control(members[1]).unwrap().group_id().unwrap();

        let outcome = h.controller.activate(members[1], segment(1));
        assert_eq!(outcome.next_value(), Some(3));
        for member in &members {
            assert_eq!(h.controller.value(*member), Some(1));
            assert_eq!(h.surface.rendered(*member).unwrap().segments, vec![true]);
        }
        outcome.settled().await.unwrap();
        assert_eq!(h.controller.group_value(group), Some(3));

        let outcome = h.controller.activate(members[2], segment(1));
        assert_eq!(outcome.next_value(), Some(0));
        outcome.settled().await.unwrap();
        for member in &members {
            assert_eq!(h.controller.value(*member), Some(0));
        }

        let calls = h.store.resource_calls().await;
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], ResourceCall::Create { kind: ResourceKind::Ability, .. }));
        assert!(matches!(calls[1], ResourceCall::Destroy { .. }));
        let doc = h.store.get(&pc()).unwrap();
        assert!(doc.resources.is_empty());
        assert_eq!(
            doc.u32_at(&progress_field().with_key("Veteran")),
            Some(0)
        );
    }

    #[tokio::test]
    async fn when_grouped_toggle_runs_against_mock_store_then_exactly_one_create() {
        let document = character();
        let mut store = MockDocumentStore::new();
        let resolved = document.clone();
        store
            .expect_resolve()
            .returning(move |_| Ok(Some(resolved.clone())));
        store
            .expect_create_resource()
            .times(1)
            .returning(|_, _, _| Ok(ResourceId::new()));
        store.expect_destroy_resource().never();
        store
            .expect_write_field()
            .withf(|_, _, value, options| *value == json!(3) && options.suppress_rerender)
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let controller = SyncController::new(
            Arc::new(store),
            Arc::new(InMemorySurface::new()),
            Arc::new(MockNotifier::new()),
            registry(),
        );
        let members = controller
            .mount_document("sheet", "grouped-ability", &document, &[ability("Veteran", 3)])
            .unwrap();

        let outcome = controller.activate(members[0], segment(1));
        let settlement = outcome.settled().await.unwrap();
        assert!(matches!(
            settlement,
            Settlement::Settled {
                value: 3,
                threshold: ThresholdOutcome::Created(_)
            }
        ));
    }

    #[tokio::test]
    async fn when_ability_crosses_zero_then_resource_follows() {
        let h = harness();
        let id = mount_one(&h, "ability", ability("Ambush", 2)).await[0];

        // 0 → 2 acquires, 2 → 1 keeps it, 1 → 0 releases
        h.controller.activate(id, segment(2)).settled().await.unwrap();
        assert_eq!(h.store.get(&pc()).unwrap().resources.len(), 1);
        assert!(h.controller.control(id).unwrap().resource().unwrap().owned_id.is_some());

        h.controller.activate(id, segment(2)).settled().await.unwrap();
        assert_eq!(h.store.get(&pc()).unwrap().resources.len(), 1);

        h.controller.activate(id, segment(1)).settled().await.unwrap();
        assert!(h.store.get(&pc()).unwrap().resources.is_empty());
        assert_eq!(h.store.resource_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn when_ability_owned_then_mount_shows_at_least_one_slot() {
        let h = harness();
        h.store.update(&pc(), |doc| {
            doc.resources.push(bladesheet_domain::OwnedResource {
                id: ResourceId::new(),
                kind: ResourceKind::Ability,
                source_key: "Ambush".to_string(),
                name: "Ambush (Cutter)".to_string(),
            });
        });
        let id = mount_one(&h, "ability", ability("Ambush", 2)).await[0];
        assert_eq!(h.controller.value(id), Some(1));
        assert!(h.controller.control(id).unwrap().resource().unwrap().owned_id.is_some());
    }

    #[tokio::test]
    async fn when_document_vanishes_then_interaction_is_a_silent_noop() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];
        h.store.remove(&pc());

        let settlement = h.controller.activate(id, segment(4)).settled().await.unwrap();
        assert!(matches!(
            settlement,
            Settlement::Reverted {
                value: 0,
                error: SyncError::Resolution(_)
            }
        ));
        assert_eq!(h.controller.value(id), Some(0));
        assert_eq!(decode(&h.surface.rendered(id).unwrap()).value, 0);
        assert!(h.notifier.messages().is_empty());
        assert!(h.controller.guard().is_empty());
    }

    #[tokio::test]
    async fn when_document_missing_at_mount_then_nothing_is_mounted() {
        let h = harness();
        let ids = h
            .controller
            .mount("sheet", "stress", &DocumentRef::new("Actor.gone").unwrap(), &[ControlInstance::default()])
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert!(h.surface.is_empty());
    }

    #[tokio::test]
    async fn when_write_fails_then_view_reverts_and_user_is_warned_once() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default().with_label("Stress")).await[0];
        h.store.fail_writes(true);

        let outcome = h.controller.activate(id, segment(5));
        assert_eq!(h.controller.value(id), Some(5));

        let settlement = outcome.settled().await.unwrap();
        assert!(matches!(
            settlement,
            Settlement::Reverted {
                value: 0,
                error: SyncError::Persistence(StoreError::Rejected(_))
            }
        ));
        assert_eq!(h.controller.value(id), Some(0));
        assert_eq!(decode(&h.surface.rendered(id).unwrap()).value, 0);
        assert_eq!(h.notifier.messages().len(), 1);
        assert!(h.notifier.messages()[0].contains("Stress"));

        // the same click goes through again once the store recovers
        h.store.fail_writes(false);
        let settlement = h.controller.activate(id, segment(5)).settled().await.unwrap();
        assert!(settlement.is_settled());
    }

    #[tokio::test]
    async fn when_write_times_out_then_revert_uses_stored_value() {
        let document = character().with_data(json!({
            "system": { "stress": { "value": 2, "max": 9 } }
        }));
        let mut store = MockDocumentStore::new();
        let resolved = document.clone();
        store
            .expect_resolve()
            .returning(move |_| Ok(Some(resolved.clone())));
        store
            .expect_write_field()
            .returning(|_, _, _, _| Err(StoreError::timeout("write_field")));
        let mut notifier = MockNotifier::new();
        notifier.expect_warn().times(1).return_const(());

        let controller = SyncController::new(
            Arc::new(store),
            Arc::new(InMemorySurface::new()),
            Arc::new(notifier),
            registry(),
        );
        let id = controller
            .mount_document("sheet", "stress", &document, &[ControlInstance::default()])
            .unwrap()[0];

        let settlement = controller.activate(id, segment(6)).settled().await.unwrap();
        assert_eq!(settlement.value(), 2);
        assert_eq!(controller.value(id), Some(2));
    }

    #[tokio::test]
    async fn when_item_toggled_then_load_tally_moves_optimistically() {
        let h = harness();
        h.surface.set_load_tally(&pc(), LoadTally { current: 2, max: 3 });
        let item = ControlInstance::keyed("i1").with_entity(json!({ "system": { "load": 2 } }));
        let members = mount_one(&h, "item", item).await;
        assert_eq!(members.len(), 2);

        let outcome = h.controller.activate(members[0], segment(1));
        let tally = h.surface.load_tally(&pc()).unwrap();
        assert_eq!(tally.current, 4);
        assert!(tally.over_max());
        outcome.settled().await.unwrap();

        h.store.fail_writes(true);
        let settlement = h.controller.activate(members[1], segment(1)).settled().await.unwrap();
        assert_eq!(settlement.value(), 2);
        assert_eq!(h.surface.load_tally(&pc()).unwrap().current, 4);
    }

    #[tokio::test]
    async fn when_control_is_read_only_then_events_are_ignored() {
        let h = harness();
        let control = ProgressControl::new(
            pc(),
            FieldPath::default(),
            4,
            3,
            ControlStyle::Clock {
                theme: "black".to_string(),
            },
        )
        .unwrap()
        .read_only();
        let id = h.controller.attach("chat", control, None, false);

        assert!(matches!(
            h.controller.activate(id, segment(1)),
            ActivationOutcome::ReadOnly
        ));
        assert!(matches!(
            h.controller.activate(ControlId::new(), segment(1)),
            ActivationOutcome::Unknown
        ));
        assert!(h.store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn when_view_rerenders_then_controls_and_guards_are_dropped() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];
        let pending = h.controller.activate(id, segment(2));
        assert!(!h.controller.guard().is_empty());

        h.controller.begin_render("sheet");
        assert!(h.controller.guard().is_empty());
        assert!(h.controller.controls_in("sheet").is_empty());
        assert!(h.surface.is_empty());

        // the in-flight write still lands
        pending.settled().await.unwrap();
        let stored = h.store.get(&pc()).unwrap().u32_at(&path("system.stress.value"));
        assert_eq!(stored, Some(2));
    }

    #[tokio::test]
    async fn when_foreign_markup_adopted_then_state_is_decoded() {
        let h = harness();
        h.store.insert(
            Document::new(DocumentRef::new("Actor.c1").unwrap(), DocumentKind::Clock, "Alarm")
                .with_data(json!({ "system": { "type": 8, "value": 3 } })),
        );
        let id = ControlId::new();
        let mut markup = RenderedControl::blank(
            ControlStyle::Clock {
                theme: "red".to_string(),
            },
            8,
        );
        markup.face = Some("systems/blades-in-the-dark/themes/red/8clock_3.svg".to_string());
        markup.name = Some("system.value-c1-x7k2".to_string());
        h.surface.mount(id, markup);

        let value = h
            .controller
            .adopt_rendered("journal", id, DocumentRef::new("Actor.c1").unwrap())
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(
            h.controller.control(id).unwrap().field_path().as_str(),
            "system.value"
        );

        let outcome = h.controller.activate(id, segment(5));
        assert_eq!(outcome.next_value(), Some(5));
        outcome.settled().await.unwrap();
        assert_eq!(
            h.surface.rendered(id).unwrap().state_class.as_deref(),
            Some("clock-8-5")
        );

        assert!(matches!(
            h.controller.adopt_rendered("journal", ControlId::new(), pc()),
            Err(SyncError::UnknownControl(_))
        ));
    }

    /// In-memory store that holds back writes of one value.
    struct SlowStore {
        inner: Arc<InMemoryDocumentStore>,
        slow_value: Value,
    }

    #[async_trait::async_trait]
    impl DocumentStore for SlowStore {
        async fn resolve(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
            self.inner.resolve(reference).await
        }

        async fn write_field(
            &self,
            reference: &DocumentRef,
            path: &FieldPath,
            value: Value,
            options: WriteOptions,
        ) -> Result<(), StoreError> {
            if value == self.slow_value {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.inner.write_field(reference, path, value, options).await
        }

        async fn create_resource(
            &self,
            reference: &DocumentRef,
            kind: ResourceKind,
            data: Value,
        ) -> Result<ResourceId, StoreError> {
            self.inner.create_resource(reference, kind, data).await
        }

        async fn destroy_resource(
            &self,
            reference: &DocumentRef,
            resource: ResourceId,
        ) -> Result<(), StoreError> {
            self.inner.destroy_resource(reference, resource).await
        }
    }

    fn slow_harness(slow_value: Value) -> (SyncController, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(character());
        let slow = SlowStore {
            inner: store.clone(),
            slow_value,
        };
        let controller = SyncController::new(
            Arc::new(slow),
            Arc::new(InMemorySurface::new()),
            Arc::new(LogNotifier::new()),
            registry(),
        );
        (controller, store)
    }

    #[tokio::test]
    async fn when_toggles_overlap_on_a_slow_store_then_writes_land_in_click_order() {
        let (controller, store) = slow_harness(json!(3));
        let id = controller
            .mount("sheet", "stress", &pc(), &[ControlInstance::default()])
            .await
            .unwrap()[0];

        let first = controller.activate(id, segment(3));
        let second = controller.activate(id, segment(1));
        assert_eq!(first.next_value(), Some(3));
        assert_eq!(second.next_value(), Some(1));

        second.settled().await.unwrap();
        first.settled().await.unwrap();

        let values: Vec<Value> = store.writes().await.into_iter().map(|w| w.value).collect();
        assert_eq!(values, vec![json!(3), json!(1)]);
        let stored = store.get(&pc()).unwrap().u32_at(&path("system.stress.value"));
        assert_eq!(stored, Some(1));
        assert_eq!(controller.value(id), Some(1));
        assert!(controller.guard().is_empty());
    }

    #[tokio::test]
    async fn when_group_toggles_overlap_then_resource_follows_the_last_click() {
        let (controller, store) = slow_harness(json!(3));
        let members = controller
            .mount("sheet", "grouped-ability", &pc(), &[ability("Veteran", 3)])
            .await
            .unwrap();

        let acquire = controller.activate(members[0], segment(1));
        let release = controller.activate(members[2], Activation::Decrement);
        assert_eq!(acquire.next_value(), Some(3));
        assert_eq!(release.next_value(), Some(0));

        release.settled().await.unwrap();
        acquire.settled().await.unwrap();

        let calls = store.resource_calls().await;
        assert!(matches!(calls[..], [ResourceCall::Create { .. }, ResourceCall::Destroy { .. }]));
        let doc = store.get(&pc()).unwrap();
        assert!(doc.resources.is_empty());
        assert_eq!(doc.u32_at(&progress_field().with_key("Veteran")), Some(0));
    }

    #[tokio::test]
    async fn when_surface_changed_elsewhere_then_click_starts_from_what_is_shown() {
        let h = harness();
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];

        // another session moved stress to 3 and the host re-rendered markers
        h.store.update(&pc(), |doc| {
            doc.set_field(&path("system.stress.value"), json!(3));
        });
        h.surface.apply(id, &encode(&ControlStyle::Track, 9, 3));

        let outcome = h.controller.activate(id, segment(3));
        assert_eq!(outcome.next_value(), Some(2));
        outcome.settled().await.unwrap();
        let stored = h.store.get(&pc()).unwrap().u32_at(&path("system.stress.value"));
        assert_eq!(stored, Some(2));
    }

    #[tokio::test]
    async fn when_group_markers_changed_elsewhere_then_click_clears_the_group() {
        let h = harness();
        let members = mount_one(&h, "grouped-ability", ability("Veteran", 2)).await;
        for member in &members {
            h.surface.apply(*member, &encode(&ControlStyle::Slots, 1, 1));
        }

        let outcome = h.controller.activate(members[1], segment(1));
        assert_eq!(outcome.next_value(), Some(0));
        let settlement = outcome.settled().await.unwrap();
        assert!(matches!(
            settlement,
            Settlement::Settled {
                value: 0,
                threshold: ThresholdOutcome::AlreadySatisfied(_)
            }
        ));
    }

    #[tokio::test]
    async fn when_document_changed_elsewhere_then_next_render_reads_it() {
        let h = harness();
        mount_one(&h, "stress", ControlInstance::default()).await;
        h.store.update(&pc(), |doc| {
            doc.set_field(&path("system.stress.value"), json!(4));
        });

        h.controller.begin_render("sheet");
        let id = mount_one(&h, "stress", ControlInstance::default()).await[0];
        let outcome = h.controller.activate(id, Activation::Decrement);
        assert_eq!(outcome.next_value(), Some(3));
        outcome.settled().await.unwrap();
    }

    #[tokio::test]
    async fn when_view_ends_then_its_controls_are_unmounted() {
        let h = harness();
        let sheet = mount_one(&h, "stress", ControlInstance::default()).await[0];
        let gone = DocumentRef::new("Actor.gone").unwrap();
        h.controller
            .mount("chat", "stress", &gone, &[ControlInstance::default()])
            .await
            .unwrap();
        let chat = h
            .controller
            .mount("chat", "grouped-ability", &pc(), &[ability("Veteran", 2)])
            .await
            .unwrap();

        assert_eq!(h.controller.end_render("chat"), 2);
        assert!(h.controller.controls_in("chat").is_empty());
        assert!(h.surface.rendered(chat[0]).is_none());
        assert!(h.controller.state.groups.is_empty());
        assert!(h.controller.state.unresolved.is_empty());
        assert_eq!(h.controller.controls_in("sheet"), vec![sheet]);
    }

    #[test]
    fn mounted_value_normalizes_groups_and_ownership() {
        assert_eq!(mounted_value(1, 3, false, true), 3);
        assert_eq!(mounted_value(0, 3, true, true), 3);
        assert_eq!(mounted_value(0, 3, false, true), 0);
        assert_eq!(mounted_value(0, 2, true, false), 1);
        assert_eq!(mounted_value(7, 2, false, false), 2);
    }
}
