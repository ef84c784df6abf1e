//! Pending toggle guard.
//!
//! Overlapping clickable regions (a label and its input) can deliver the
//! same logical click twice. The guard remembers, per control or group,
//! the value an in-flight toggle started from and the value it produced.
//! An event that would produce that same value again from the same
//! starting point is a duplicate and is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use bladesheet_domain::{ControlId, GroupId};
use dashmap::DashMap;

/// What a pending toggle is keyed by: grouped members share their group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKey {
    Control(ControlId),
    Group(GroupId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToggle {
    pub base: u32,
    pub next: u32,
    ticket: u64,
}

#[derive(Default)]
pub struct PendingToggleGuard {
    pending: DashMap<GuardKey, PendingToggle>,
    tickets: AtomicU64,
}

impl PendingToggleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an event resolving to `resolve(base)` repeats the pending
    /// toggle for `key`.
    pub fn is_duplicate(&self, key: GuardKey, resolve: impl Fn(u32) -> u32) -> bool {
        self.pending
            .get(&key)
            .is_some_and(|pending| resolve(pending.base) == pending.next)
    }

    /// Record a toggle from `base` to `next`. Returns the ticket that
    /// releases it.
    pub fn arm(&self, key: GuardKey, base: u32, next: u32) -> u64 {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.insert(key, PendingToggle { base, next, ticket });
        ticket
    }

    /// Release the toggle armed with `ticket`. A later toggle on the same
    /// key is left in place.
    pub fn release(&self, key: GuardKey, ticket: u64) {
        self.pending.remove_if(&key, |_, pending| pending.ticket == ticket);
    }

    pub fn forget(&self, key: GuardKey) {
        self.pending.remove(&key);
    }

    pub fn pending(&self, key: GuardKey) -> Option<PendingToggle> {
        self.pending.get(&key).map(|p| *p)
    }

    pub fn clear(&self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
