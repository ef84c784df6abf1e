//! Snapshot projector: record hooks for chat history and journals.
//!
//! Chat records freeze every referenced clock's value when they are
//! created and render read-only controls from those frozen values forever
//! after. Journal records render live, interactive clocks.

use std::collections::HashMap;
use std::sync::Arc;

use bladesheet_domain::{
    capture_snapshot, project_from_snapshot, ClockDefaults, ClockState, ControlId, Document,
    DocumentRef, HistoricalRecord, HistoricalSnapshot, RecordId, RecordKind, ReferenceLink,
};
use futures_util::future::join_all;

use crate::infrastructure::ports::{ClockPort, DocumentStore};
use crate::use_cases::sync::SyncController;

/// One control rendered in place of a reference link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedControl {
    pub link: ReferenceLink,
    pub control: ControlId,
    pub value: u32,
    pub interactive: bool,
}

pub struct SnapshotProjector {
    store: Arc<dyn DocumentStore>,
    sync: SyncController,
    clock: Arc<dyn ClockPort>,
    defaults: ClockDefaults,
}

impl SnapshotProjector {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sync: SyncController,
        clock: Arc<dyn ClockPort>,
        defaults: ClockDefaults,
    ) -> Self {
        Self {
            store,
            sync,
            clock,
            defaults,
        }
    }

    /// A new record stamped with the current time.
    pub fn record(&self, kind: RecordKind, content: impl Into<String>) -> HistoricalRecord {
        HistoricalRecord::new(kind, content, self.clock.now())
    }

    /// Capture hook, run before a record is committed.
    ///
    /// Chat records get the current value of every referenced clock
    /// embedded in their content. Unresolvable references are left alone.
    /// Returns the number of snapshots captured.
    pub async fn before_create(&self, record: &mut HistoricalRecord) -> usize {
        if record.kind != RecordKind::Chat {
            return 0;
        }
        let targets: Vec<DocumentRef> = record
            .links()
            .into_iter()
            .filter(|link| link.snapshot.is_none())
            .map(|link| link.target)
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let values: HashMap<DocumentRef, u32> = self
            .clocks(&targets)
            .await
            .into_iter()
            .map(|(doc, clock)| (doc.reference, clock.value))
            .collect();
        let mut captured = 0;
        record.content = capture_snapshot(&record.content, |owner| {
            let value = values.get(owner).copied();
            captured += usize::from(value.is_some());
            value
        });

        tracing::info!(
            record = %record.id,
            captured,
            references = targets.len(),
            "Captured progress snapshots"
        );
        captured
    }

    /// Render hook. Mounts one control per projectable reference under the
    /// record's own view, replacing whatever the previous render mounted.
    ///
    /// Chat references without a snapshot, and references whose document
    /// cannot be resolved, are skipped and keep the host's default link
    /// rendering.
    pub async fn on_render(&self, record: &HistoricalRecord) -> Vec<ProjectedControl> {
        let view = record_view(record.id);
        self.sync.begin_render(&view);

        let links = record.links();
        let targets: Vec<DocumentRef> = links.iter().map(|l| l.target.clone()).collect();
        let clocks: HashMap<DocumentRef, ClockState> = self
            .clocks(&targets)
            .await
            .into_iter()
            .map(|(doc, clock)| (doc.reference, clock))
            .collect();

        let mut projected = Vec::new();
        for link in links {
            let Some(clock) = clocks.get(&link.target) else {
                continue;
            };
            let control = match record.kind {
                RecordKind::Chat => {
                    let Some(snapshot) = HistoricalSnapshot::from_link(&link, record.created_at)
                    else {
                        continue;
                    };
                    project_from_snapshot(&snapshot, clock)
                }
                RecordKind::Journal => clock.control(link.target.clone()),
            };
            let control = match control {
                Ok(control) => control,
                Err(e) => {
                    tracing::debug!(target = %link.target, error = %e, "Reference not projected");
                    continue;
                }
            };
            let value = control.value();
            let interactive = control.is_interactive();
            let id = self.sync.attach(&view, control, None, false);
            projected.push(ProjectedControl {
                link,
                control: id,
                value,
                interactive,
            });
        }

        tracing::debug!(record = %record.id, count = projected.len(), "Projected record controls");
        projected
    }

    /// Removal hook, run when a record is deleted or its rendering is
    /// discarded. Returns the number of controls unmounted.
    pub fn on_remove(&self, record: RecordId) -> usize {
        let removed = self.sync.end_render(&record_view(record));
        tracing::debug!(record = %record, removed, "Unmounted record controls");
        removed
    }

    /// Mount the live control of a clock on its own sheet.
    pub async fn mount_clock(&self, view: &str, reference: &DocumentRef) -> Option<ControlId> {
        let (_, clock) = self
            .clocks(std::slice::from_ref(reference))
            .await
            .into_iter()
            .next()?;
        match clock.control(reference.clone()) {
            Ok(control) => Some(self.sync.attach(view, control, None, false)),
            Err(e) => {
                tracing::debug!(clock = %reference, error = %e, "Clock not mounted");
                None
            }
        }
    }

    /// Journals that reference `clock` and should re-render after it
    /// changed.
    pub fn stale_journals(&self, clock: &DocumentRef, records: &[HistoricalRecord]) -> Vec<RecordId> {
        records
            .iter()
            .filter(|r| r.kind == RecordKind::Journal)
            .filter(|r| r.links().iter().any(|link| &link.target == clock))
            .map(|r| r.id)
            .collect()
    }

    /// Resolve every distinct target that is a clock document.
    async fn clocks(&self, targets: &[DocumentRef]) -> Vec<(Document, ClockState)> {
        let mut distinct: Vec<&DocumentRef> = targets.iter().collect();
        distinct.sort();
        distinct.dedup();

        let resolved = join_all(distinct.into_iter().map(|target| async move {
            match self.store.resolve(target).await {
                Ok(document) => document,
                Err(e) => {
                    tracing::debug!(target = %target, error = %e, "Reference could not be resolved");
                    None
                }
            }
        }))
        .await;

        resolved
            .into_iter()
            .flatten()
            .filter_map(|doc| {
                let clock = ClockState::from_document(&doc, &self.defaults)?;
                Some((doc, clock))
            })
            .collect()
    }
}

pub fn record_view(id: RecordId) -> String {
    format!("record:{id}")
}
