// src/watch/baseline.rs

//! Baseline: the last-known fingerprint of every unit, plus storage backends.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::watch::change::{ChangeKind, ChangeRecord, Fingerprint, UnitId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineEntry {
    pub fingerprint: Fingerprint,
    pub last_observed: SystemTime,
}

/// Read access to "what the watcher currently believes" about each unit.
///
/// The plain [`Baseline`] implements it; the controller layers in-flight
/// dispatch targets on top.
pub trait KnownState {
    fn fingerprint(&self, unit: &UnitId) -> Option<&Fingerprint>;
    fn units(&self) -> Vec<&UnitId>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    entries: HashMap<UnitId, BaselineEntry>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, U, F>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, F)>,
        U: Into<UnitId>,
        F: Into<Fingerprint>,
    {
        let now = SystemTime::now();
        let entries = pairs
            .into_iter()
            .map(|(u, f)| {
                (
                    u.into(),
                    BaselineEntry {
                        fingerprint: f.into(),
                        last_observed: now,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, unit: &UnitId) -> Option<&BaselineEntry> {
        self.entries.get(unit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &BaselineEntry)> {
        self.entries.iter()
    }

    /// Commit a dispatched change.
    pub fn apply(&mut self, record: &ChangeRecord) {
        match (&record.kind, &record.current) {
            (ChangeKind::Removed, _) | (_, None) => {
                self.entries.remove(&record.unit);
            }
            (_, Some(fp)) => {
                self.entries.insert(
                    record.unit.clone(),
                    BaselineEntry {
                        fingerprint: fp.clone(),
                        last_observed: record.detected_at,
                    },
                );
            }
        }
    }

    /// Record that `unit` was seen at `at` without a fingerprint change.
    pub fn touch(&mut self, unit: &UnitId, at: SystemTime) {
        if let Some(entry) = self.entries.get_mut(unit) {
            if entry.last_observed < at {
                entry.last_observed = at;
            }
        }
    }

    /// Ordered unit -> fingerprint view, handy for assertions and dry runs.
    pub fn fingerprints(&self) -> BTreeMap<UnitId, Fingerprint> {
        self.entries
            .iter()
            .map(|(u, e)| (u.clone(), e.fingerprint.clone()))
            .collect()
    }

    fn insert_entry(&mut self, unit: UnitId, entry: BaselineEntry) {
        self.entries.insert(unit, entry);
    }
}

impl KnownState for Baseline {
    fn fingerprint(&self, unit: &UnitId) -> Option<&Fingerprint> {
        self.entries.get(unit).map(|e| &e.fingerprint)
    }

    fn units(&self) -> Vec<&UnitId> {
        self.entries.keys().collect()
    }
}

/// Storage for the baseline between process runs.
pub trait BaselineStore: Send {
    fn load(&self) -> Result<Baseline>;
    fn save(&mut self, baseline: &Baseline) -> Result<()>;
}

/// Keeps nothing: every start begins with an empty baseline.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    last: Option<Baseline>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved baseline, if any.
    pub fn last_saved(&self) -> Option<&Baseline> {
        self.last.as_ref()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self) -> Result<Baseline> {
        Ok(self.last.clone().unwrap_or_default())
    }

    fn save(&mut self, baseline: &Baseline) -> Result<()> {
        self.last = Some(baseline.clone());
        Ok(())
    }
}

/// Stores the baseline as one JSON object per line:
///
/// `{"unit":"src/a.rs","fingerprint":"9f2c...","last_observed_ms":1700000000123}`
///
/// JSON string escaping keeps unit ids with tabs or newlines intact. Writes
/// go to `<path>.tmp` first and are then renamed over `path`.
#[derive(Debug)]
pub struct FileBaselineStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileBaselineStore {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// One line of the baseline file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    unit: String,
    fingerprint: String,
    #[serde(default)]
    last_observed_ms: u64,
}

impl BaselineStore for FileBaselineStore {
    fn load(&self) -> Result<Baseline> {
        if !self.fs.exists(&self.path) {
            debug!(path = ?self.path, "no baseline file; starting empty");
            return Ok(Baseline::new());
        }

        let contents = self
            .fs
            .read_to_string(&self.path)
            .with_context(|| format!("loading baseline from {:?}", self.path))?;

        let mut baseline = Baseline::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredEntry = match serde_json::from_str(line) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(
                        path = ?self.path,
                        line = lineno + 1,
                        error = %e,
                        "skipping malformed baseline line"
                    );
                    continue;
                }
            };
            baseline.insert_entry(
                UnitId::new(stored.unit),
                BaselineEntry {
                    fingerprint: Fingerprint::new(stored.fingerprint),
                    last_observed: UNIX_EPOCH + Duration::from_millis(stored.last_observed_ms),
                },
            );
        }

        info!(path = ?self.path, units = baseline.len(), "loaded baseline");
        Ok(baseline)
    }

    fn save(&mut self, baseline: &Baseline) -> Result<()> {
        let mut ordered: Vec<_> = baseline.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::new();
        for (unit, entry) in ordered {
            let stored = StoredEntry {
                unit: unit.as_str().to_string(),
                fingerprint: entry.fingerprint.as_str().to_string(),
                last_observed_ms: entry
                    .last_observed
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or(0),
            };
            let line = serde_json::to_string(&stored).context("encoding baseline entry")?;
            out.push_str(&line);
            out.push('\n');
        }

        let tmp = self.tmp_path();
        self.fs
            .write(&tmp, out.as_bytes())
            .with_context(|| format!("writing baseline to {:?}", tmp))?;
        self.fs.rename(&tmp, &self.path)?;
        debug!(path = ?self.path, units = baseline.len(), "stored baseline");
        Ok(())
    }
}
