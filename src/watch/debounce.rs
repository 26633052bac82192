// src/watch/debounce.rs

//! Per-unit debouncing and coalescing of change records.
//!
//! Time is passed in explicitly so the debouncer stays deterministic; the
//! controller feeds it `Instant`s from the (possibly paused) Tokio clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::watch::change::{ChangeRecord, UnitId};

/// A change waiting for its unit to go quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub record: ChangeRecord,
    pub first_detected: Instant,
    pub deadline: Instant,
    /// Number of merged updates since the change was first detected.
    pub revision: u32,
}

/// What [`Debouncer::submit`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First record for the unit; a new pending change was created.
    Created,
    /// Merged into the existing pending change; deadline was pushed back.
    Updated { revision: u32 },
    /// Same target state as the pending change; nothing moved.
    Unchanged,
    /// The merge netted out to no change; the pending change was dropped.
    Cancelled,
}

/// Merge two consecutive records for the same unit.
///
/// The result spans from the earlier record's `previous` to the later
/// record's `current`, and its kind is derived from that span:
///
/// - Added then Modified: Added with the final fingerprint.
/// - anything then Removed: Removed.
/// - Removed then Added: Modified from the pre-removal fingerprint.
///
/// Returns `None` when the span is not a change at all (Added then Removed,
/// or a return to the original fingerprint).
pub fn merge(earlier: &ChangeRecord, later: &ChangeRecord) -> Option<ChangeRecord> {
    ChangeRecord::from_transition(
        later.unit.clone(),
        earlier.previous.clone(),
        later.current.clone(),
        later.detected_at,
    )
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet_window: Duration,
    max_wait: Option<Duration>,
    pending: HashMap<UnitId, PendingChange>,
}

impl Debouncer {
    pub fn new(quiet_window: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            quiet_window,
            max_wait,
            pending: HashMap::new(),
        }
    }

    fn deadline_for(&self, first_detected: Instant, now: Instant) -> Instant {
        let quiet = now + self.quiet_window;
        match self.max_wait {
            Some(max_wait) => quiet.min(first_detected + max_wait),
            None => quiet,
        }
    }

    pub fn submit(&mut self, record: ChangeRecord, now: Instant) -> SubmitOutcome {
        let Some(existing) = self.pending.get(&record.unit) else {
            let deadline = self.deadline_for(now, now);
            self.pending.insert(
                record.unit.clone(),
                PendingChange {
                    record,
                    first_detected: now,
                    deadline,
                    revision: 0,
                },
            );
            return SubmitOutcome::Created;
        };

        // Re-detection of the same target (polling sees it every cycle until
        // dispatch) must not keep the unit from settling.
        if existing.record.current == record.current {
            return SubmitOutcome::Unchanged;
        }

        match merge(&existing.record, &record) {
            None => {
                self.pending.remove(&record.unit);
                SubmitOutcome::Cancelled
            }
            Some(merged) => {
                let deadline = self.deadline_for(existing.first_detected, now);
                let unit = merged.unit.clone();
                let entry = self.pending.get_mut(&unit);
                match entry {
                    Some(p) => {
                        p.record = merged;
                        p.revision = p.revision.saturating_add(1);
                        p.deadline = deadline;
                        SubmitOutcome::Updated {
                            revision: p.revision,
                        }
                    }
                    None => SubmitOutcome::Unchanged,
                }
            }
        }
    }

    pub fn cancel(&mut self, unit: &UnitId) -> Option<PendingChange> {
        self.pending.remove(unit)
    }

    pub fn get(&self, unit: &UnitId) -> Option<&PendingChange> {
        self.pending.get(unit)
    }

    pub fn pending_units(&self) -> Vec<UnitId> {
        self.pending.keys().cloned().collect()
    }

    /// Remove and return every change whose deadline is at or before `now`,
    /// in detection order.
    pub fn take_settled(&mut self, now: Instant) -> Vec<ChangeRecord> {
        let due: Vec<UnitId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(u, _)| u.clone())
            .collect();

        let mut settled: Vec<PendingChange> =
            due.iter().filter_map(|u| self.pending.remove(u)).collect();
        sort_pending(&mut settled);
        settled.into_iter().map(|p| p.record).collect()
    }

    /// Settle everything immediately, in detection order.
    pub fn flush(&mut self) -> Vec<ChangeRecord> {
        let mut all: Vec<PendingChange> = self.pending.drain().map(|(_, p)| p).collect();
        sort_pending(&mut all);
        all.into_iter().map(|p| p.record).collect()
    }

    /// Drop everything; returns how many pending changes were discarded.
    pub fn discard(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn sort_pending(changes: &mut [PendingChange]) {
    changes.sort_by(|a, b| {
        a.first_detected
            .cmp(&b.first_detected)
            .then_with(|| a.record.unit.cmp(&b.record.unit))
    });
}
