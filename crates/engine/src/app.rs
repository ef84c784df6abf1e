//! Application state and composition.

use std::sync::Arc;

use bladesheet_domain::blades::ability_cost_rule;
use bladesheet_domain::{ControlStyle, CostRule, FieldPath, ResourceKind, ThresholdBinding};

use crate::config::EngineConfig;
use crate::infrastructure::ports::{ClockPort, DocumentStore, Notifier, RenderSurface, UiStateStore};
use crate::use_cases::{
    CapacitySource, ControlRegistry, ControlSpec, ResourceLifecycle, SnapshotProjector,
    SyncController, SyncError, ViewStateService,
};

/// Selectors of the controls every character sheet renders.
pub mod selectors {
    pub const STRESS: &str = "stress";
    pub const TRAUMA: &str = "trauma";
    pub const ABILITY: &str = "ability";
    pub const ITEM: &str = "item";
}

/// Main application state.
pub struct App {
    pub config: EngineConfig,
    pub ports: Ports,
    pub use_cases: UseCases,
}

/// Host adapters the engine is wired to.
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn DocumentStore>,
    pub surface: Arc<dyn RenderSurface>,
    pub notifier: Arc<dyn Notifier>,
    pub ui_state: Arc<dyn UiStateStore>,
    pub clock: Arc<dyn ClockPort>,
}

/// Container for all use cases.
pub struct UseCases {
    pub sync: SyncController,
    pub snapshots: Arc<SnapshotProjector>,
    pub lifecycle: Arc<ResourceLifecycle>,
    pub view_state: Arc<ViewStateService>,
}

impl App {
    pub fn new(config: EngineConfig, ports: Ports) -> Result<Self, SyncError> {
        let registry = Arc::new(ControlRegistry::new());
        register_sheet_controls(&registry, &config)?;

        let sync = SyncController::new(
            ports.store.clone(),
            ports.surface.clone(),
            ports.notifier.clone(),
            registry,
        );
        let snapshots = Arc::new(SnapshotProjector::new(
            ports.store.clone(),
            sync.clone(),
            ports.clock.clone(),
            config.clock.clone(),
        ));
        let lifecycle = Arc::new(ResourceLifecycle::new(
            ports.store.clone(),
            config.module_id.clone(),
        ));
        let view_state = Arc::new(ViewStateService::new(ports.ui_state.clone()));

        tracing::info!(
            module_id = %config.module_id,
            deep_cuts_load = config.deep_cuts_load,
            "Engine composed"
        );
        Ok(Self {
            config,
            ports,
            use_cases: UseCases {
                sync,
                snapshots,
                lifecycle,
                view_state,
            },
        })
    }
}

/// Register the character sheet's control classes.
pub fn register_sheet_controls(
    registry: &ControlRegistry,
    config: &EngineConfig,
) -> Result<(), SyncError> {
    for (selector, track) in [(selectors::STRESS, "stress"), (selectors::TRAUMA, "trauma")] {
        registry.register_progress_control(
            selector,
            ControlSpec::new(
                FieldPath::new(format!("system.{track}.value"))?,
                CapacitySource::Field(FieldPath::new(format!("system.{track}.max"))?),
                ControlStyle::Track,
            ),
        )?;
    }

    let progress = config.ability_progress_field()?;
    registry.register_progress_control(
        selectors::ABILITY,
        ControlSpec::new(
            progress.clone(),
            CapacitySource::Cost(ability_cost_rule()),
            ControlStyle::Slots,
        )
        .with_threshold(ThresholdBinding::new(
            progress,
            ResourceKind::Ability,
            ability_cost_rule(),
        )),
    )?;

    registry.register_progress_control(
        selectors::ITEM,
        ControlSpec::new(
            config.equipped_item_field()?,
            CapacitySource::Cost(CostRule::Attribute {
                paths: vec![FieldPath::new("system.load")?],
                fallback: 1,
            }),
            ControlStyle::Slots,
        )
        .grouped()
        .affecting_load(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::memory_store::{InMemoryDocumentStore, InMemoryUiStateStore};
    use crate::infrastructure::memory_surface::{InMemorySurface, LogNotifier};
    use crate::use_cases::ControlInstance;
    use bladesheet_domain::{Activation, Document, DocumentKind, DocumentRef};
    use serde_json::json;

    fn app(store: Arc<InMemoryDocumentStore>) -> App {
        let ports = Ports {
            store,
            surface: Arc::new(InMemorySurface::new()),
            notifier: Arc::new(LogNotifier::new()),
            ui_state: Arc::new(InMemoryUiStateStore::new()),
            clock: Arc::new(SystemClock),
        };
        App::new(EngineConfig::default(), ports).unwrap()
    }

    #[test]
    fn sheet_selectors_are_registered() {
        let registry = ControlRegistry::new();
        register_sheet_controls(&registry, &EngineConfig::default()).unwrap();
        assert_eq!(registry.len(), 4);

        let ability = registry.get(selectors::ABILITY).unwrap();
        assert!(ability.threshold.is_some());
        let item = registry.get(selectors::ITEM).unwrap();
        assert!(item.grouped && item.affects_load);
    }

    #[tokio::test]
    async fn when_stress_toggled_through_app_then_document_is_written() {
        let pc = DocumentRef::new("Actor.pc1").unwrap();
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(
            Document::new(pc.clone(), DocumentKind::Character, "Silver")
                .with_data(json!({ "system": { "stress": { "value": 0, "max": 9 } } })),
        );
        let app = app(store.clone());
        let sync = &app.use_cases.sync;

        let ids = sync
            .mount("sheet", selectors::STRESS, &pc, &[ControlInstance::default()])
            .await
            .unwrap();
        let outcome = sync.activate(ids[0], Activation::Segment { segment: 3 });
        assert_eq!(outcome.next_value(), Some(3));
        outcome.settled().await.unwrap();

        let stored = store
            .get(&pc)
            .unwrap()
            .u32_at(&FieldPath::new("system.stress.value").unwrap());
        assert_eq!(stored, Some(3));
    }
}
