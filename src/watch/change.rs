// src/watch/change.rs

//! Core data model: units, fingerprints, observations and change records.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Opaque, stable identity of one tracked unit (a path, a record key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Token summarising a unit's state. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// All units visible at one polling instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub units: HashMap<UnitId, Fingerprint>,
    pub observed_at: SystemTime,
}

impl Observation {
    pub fn new(observed_at: SystemTime) -> Self {
        Self {
            units: HashMap::new(),
            observed_at,
        }
    }

    /// Build an observation stamped with the current wall-clock time.
    pub fn from_pairs<I, U, F>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, F)>,
        U: Into<UnitId>,
        F: Into<Fingerprint>,
    {
        let mut obs = Self::new(SystemTime::now());
        for (unit, fp) in pairs {
            obs.insert(unit, fp);
        }
        obs
    }

    pub fn insert(&mut self, unit: impl Into<UnitId>, fingerprint: impl Into<Fingerprint>) {
        self.units.insert(unit.into(), fingerprint.into());
    }

    pub fn get(&self, unit: &UnitId) -> Option<&Fingerprint> {
        self.units.get(unit)
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.units.contains_key(unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A single discrete change reported by a push adapter.
///
/// `fingerprint == None` means the unit is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEvent {
    pub unit: UnitId,
    pub fingerprint: Option<Fingerprint>,
    pub observed_at: SystemTime,
}

impl UnitEvent {
    pub fn present(unit: impl Into<UnitId>, fingerprint: impl Into<Fingerprint>) -> Self {
        Self {
            unit: unit.into(),
            fingerprint: Some(fingerprint.into()),
            observed_at: SystemTime::now(),
        }
    }

    pub fn gone(unit: impl Into<UnitId>) -> Self {
        Self {
            unit: unit.into(),
            fingerprint: None,
            observed_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Classify a fingerprint transition. `None` means "no change".
    pub fn from_transition(
        previous: Option<&Fingerprint>,
        current: Option<&Fingerprint>,
    ) -> Option<ChangeKind> {
        match (previous, current) {
            (None, Some(_)) => Some(ChangeKind::Added),
            (Some(_), None) => Some(ChangeKind::Removed),
            (Some(prev), Some(cur)) if prev != cur => Some(ChangeKind::Modified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected change of one unit.
///
/// `kind` is always consistent with `previous`/`current`; construct through
/// [`ChangeRecord::from_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub unit: UnitId,
    pub kind: ChangeKind,
    pub previous: Option<Fingerprint>,
    pub current: Option<Fingerprint>,
    pub detected_at: SystemTime,
}

impl ChangeRecord {
    pub fn from_transition(
        unit: UnitId,
        previous: Option<Fingerprint>,
        current: Option<Fingerprint>,
        detected_at: SystemTime,
    ) -> Option<Self> {
        let kind = ChangeKind::from_transition(previous.as_ref(), current.as_ref())?;
        Some(Self {
            unit,
            kind,
            previous,
            current,
            detected_at,
        })
    }

    /// Detection time as milliseconds since the Unix epoch.
    pub fn detected_at_millis(&self) -> u64 {
        self.detected_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
