// src/watch/detector.rs

//! Classifies units by comparing known state against a new observation.

use std::collections::HashMap;

use tracing::debug;

use crate::watch::baseline::KnownState;
use crate::watch::change::{ChangeRecord, Observation, UnitEvent, UnitId};

/// Result of one detection pass.
///
/// Every unit that is either known or observed lands in exactly one of the
/// three lists. `absent_unconfirmed` units are missing from the observation
/// but have not yet been missing for `absence_confirm_count` consecutive
/// observations; for this cycle they count as unchanged.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub changes: Vec<ChangeRecord>,
    pub unchanged: Vec<UnitId>,
    pub absent_unconfirmed: Vec<UnitId>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    absence_confirm_count: u32,
    /// Consecutive missing observations per known unit.
    missing: HashMap<UnitId, u32>,
}

impl ChangeDetector {
    pub fn new(absence_confirm_count: u32) -> Self {
        Self {
            absence_confirm_count: absence_confirm_count.max(1),
            missing: HashMap::new(),
        }
    }

    pub fn absence_confirm_count(&self) -> u32 {
        self.absence_confirm_count
    }

    /// How many consecutive observations `unit` has been missing from.
    pub fn missing_count(&self, unit: &UnitId) -> u32 {
        self.missing.get(unit).copied().unwrap_or(0)
    }

    /// Compare a full snapshot against `known`.
    pub fn detect(&mut self, known: &impl KnownState, observation: &Observation) -> Detection {
        let mut detection = Detection::default();
        let at = observation.observed_at;

        for (unit, fp) in &observation.units {
            match known.fingerprint(unit) {
                Some(prev) if prev == fp => detection.unchanged.push(unit.clone()),
                prev => {
                    if let Some(record) =
                        ChangeRecord::from_transition(unit.clone(), prev.cloned(), Some(fp.clone()), at)
                    {
                        detection.changes.push(record);
                    }
                }
            }
        }

        let mut still_missing = HashMap::new();
        for unit in known.units() {
            if observation.contains(unit) {
                continue;
            }
            let count = self.missing.get(unit).copied().unwrap_or(0).saturating_add(1);
            if count >= self.absence_confirm_count {
                let prev = known.fingerprint(unit).cloned();
                if let Some(record) = ChangeRecord::from_transition(unit.clone(), prev, None, at) {
                    detection.changes.push(record);
                }
            } else {
                debug!(unit = %unit, missing = count, "unit missing; awaiting confirmation");
                detection.absent_unconfirmed.push(unit.clone());
            }
            still_missing.insert(unit.clone(), count);
        }
        self.missing = still_missing;

        detection
    }

    /// Classify one push event. Push removals are authoritative and need no
    /// confirmation.
    pub fn detect_event(&mut self, known: &impl KnownState, event: &UnitEvent) -> Option<ChangeRecord> {
        self.missing.remove(&event.unit);
        ChangeRecord::from_transition(
            event.unit.clone(),
            known.fingerprint(&event.unit).cloned(),
            event.fingerprint.clone(),
            event.observed_at,
        )
    }
}
