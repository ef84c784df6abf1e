//! Bladesheet Engine - demo entry point.
//!
//! Wires the engine to in-memory adapters, toggles a few controls on a
//! character sheet and a clock, then shows a chat snapshot staying frozen
//! while the live clock moves on.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bladesheet_domain::{
    Activation, Document, DocumentKind, DocumentRef, LoadTally, RecordKind, ResourceKind,
    ResourceTarget,
};
use bladesheet_engine::app::{selectors, Ports};
use bladesheet_engine::infrastructure::clock::SystemClock;
use bladesheet_engine::infrastructure::memory_store::{InMemoryDocumentStore, InMemoryUiStateStore};
use bladesheet_engine::infrastructure::memory_surface::{InMemorySurface, LogNotifier};
use bladesheet_engine::infrastructure::ports::RenderSurface;
use bladesheet_engine::use_cases::ControlInstance;
use bladesheet_engine::{App, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root.
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bladesheet_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Bladesheet Engine demo");
    let config = EngineConfig::from_env();

    let silver = DocumentRef::new("Actor.silver")?;
    let alarm = DocumentRef::new("Actor.alarm")?;
    let store = Arc::new(InMemoryDocumentStore::new());
    store.insert(
        Document::new(silver.clone(), DocumentKind::Character, "Silver").with_data(json!({
            "system": {
                "stress": { "value": 2, "max": 9 },
                "trauma": { "value": 0, "max": 4 },
                "base_max_load": 0,
                "selected_load_level": "BITD.Normal"
            }
        })),
    );
    store.insert(
        Document::new(alarm.clone(), DocumentKind::Clock, "Alarm")
            .with_data(json!({ "system": { "type": 6, "value": 2, "theme": "red" } })),
    );

    let surface = Arc::new(InMemorySurface::new());
    let notifier = Arc::new(LogNotifier::new());
    let ports = Ports {
        store: store.clone(),
        surface: surface.clone(),
        notifier: notifier.clone(),
        ui_state: Arc::new(InMemoryUiStateStore::new()),
        clock: Arc::new(SystemClock),
    };
    let app = App::new(config, ports)?;
    let sync = &app.use_cases.sync;
    let snapshots = &app.use_cases.snapshots;

    // Character sheet
    let sheet = store.get(&silver).context("character missing")?;
    surface.set_load_tally(
        &silver,
        LoadTally::for_character(&sheet, &app.config.module_id, app.config.deep_cuts_load),
    );
    sync.begin_render("sheet");

    let stress = sync
        .mount("sheet", selectors::STRESS, &silver, &[ControlInstance::default()])
        .await?;
    for id in &stress {
        let outcome = sync.activate(*id, Activation::Segment { segment: 5 });
        if let Some(settlement) = outcome.settled().await {
            tracing::info!(value = settlement.value(), "Stress settled");
        }
    }

    let veteran = ControlInstance::keyed("Veteran")
        .with_label("Veteran")
        .with_entity(json!({ "system": { "price": 3 } }))
        .with_resource(ResourceTarget {
            kind: ResourceKind::Ability,
            source_key: "Veteran".to_string(),
            name: "Veteran".to_string(),
            owned_id: None,
            seed: json!({ "system": { "price": 3 } }),
        });
    let abilities = sync
        .mount("sheet", selectors::ABILITY, &silver, &[veteran])
        .await?;
    if let Some(id) = abilities.first() {
        let outcome = sync.activate(*id, Activation::Segment { segment: 1 });
        if let Some(settlement) = outcome.settled().await {
            tracing::info!(?settlement, "Ability slot settled");
        }
    }

    let lantern = ControlInstance::keyed("lantern")
        .with_label("Lantern")
        .with_entity(json!({ "system": { "load": 2 } }));
    let items = sync
        .mount("sheet", selectors::ITEM, &silver, &[lantern])
        .await?;
    if let Some(id) = items.first() {
        let outcome = sync.activate(*id, Activation::Segment { segment: 1 });
        outcome.settled().await;
    }
    if let Some(tally) = surface.load_tally(&silver) {
        tracing::info!(current = tally.current, max = tally.max, "Load after equipping");
    }

    // Clock sheet
    sync.begin_render("clock");
    let clock = snapshots
        .mount_clock("clock", &alarm)
        .await
        .context("clock not mounted")?;
    sync.activate(clock, Activation::Segment { segment: 3 })
        .settled()
        .await;

    // Chat snapshot, then the live clock moves on
    let mut record = snapshots.record(RecordKind::Chat, "The @UUID[Actor.alarm]{Alarm} is ticking.");
    snapshots.before_create(&mut record).await;
    tracing::info!(content = %record.content, "Chat record created");

    sync.activate(clock, Activation::Segment { segment: 5 })
        .settled()
        .await;
    let live = sync.value(clock);
    let frozen: Vec<u32> = snapshots
        .on_render(&record)
        .await
        .into_iter()
        .map(|projected| projected.value)
        .collect();
    tracing::info!(?live, ?frozen, "Live clock and chat snapshot");

    tracing::info!(warnings = notifier.messages().len(), "Demo finished");
    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
