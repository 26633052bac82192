// src/adapter/notify.rs

//! Push adapter built on `notify`.
//!
//! After every (re)connect the first `next` returns a full snapshot so that
//! changes made while disconnected are not lost. Later calls return one
//! [`UnitEvent`] per changed unit.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::adapter::directory::snapshot_tree;
use crate::adapter::{AdapterFuture, Cadence, Observed, ResourceAdapter};
use crate::errors::AdapterError;
use crate::fs::FileSystem;
use crate::watch::{compute_file_fingerprint, UnitEvent, UnitFilter, UnitId};

pub struct NotifyAdapter {
    root: PathBuf,
    filter: Arc<UnitFilter>,
    fs: Arc<dyn FileSystem>,
    /// Kept alive for as long as we want events; dropping it stops watching.
    watcher: Option<RecommendedWatcher>,
    events_rx: Option<mpsc::UnboundedReceiver<notify::Result<Event>>>,
    queued: VecDeque<UnitEvent>,
    /// Units this adapter has reported as present, so a removed directory can
    /// be expanded into removals of everything under it.
    present: BTreeSet<String>,
    needs_resync: bool,
}

impl std::fmt::Debug for NotifyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyAdapter")
            .field("root", &self.root)
            .field("connected", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl NotifyAdapter {
    pub fn new(root: impl Into<PathBuf>, filter: Arc<UnitFilter>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            filter,
            fs,
            watcher: None,
            events_rx: None,
            queued: VecDeque::new(),
            present: BTreeSet::new(),
            needs_resync: true,
        }
    }

    fn start_watching(&mut self) -> Result<(), AdapterError> {
        self.watcher = None;
        self.events_rx = None;

        // Canonicalize once so event paths of deleted files still strip cleanly.
        if let Ok(canon) = self.root.canonicalize() {
            self.root = canon;
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver is gone only when the adapter was dropped.
                let _ = event_tx.send(res);
            },
            Config::default(),
        )
        .map_err(AdapterError::transient)?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(AdapterError::transient)?;

        info!(root = ?self.root, "notify watcher started");
        self.watcher = Some(watcher);
        self.events_rx = Some(event_rx);
        self.queued.clear();
        self.needs_resync = true;
        Ok(())
    }

    /// Turn one notify event into unit events.
    fn translate(&mut self, event: Event) {
        let observed_at = SystemTime::now();
        for path in event.paths {
            let Some(rel) = crate::watch::relative_str(&self.root, &path) else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }

            if self.fs.is_dir(&path) {
                continue;
            }

            if self.fs.is_file(&path) {
                if !self.filter.matches(&rel) {
                    continue;
                }
                match compute_file_fingerprint(self.fs.as_ref(), &path) {
                    Ok(fp) => {
                        self.present.insert(rel.clone());
                        self.queued.push_back(UnitEvent {
                            unit: UnitId::new(rel),
                            fingerprint: Some(fp),
                            observed_at,
                        });
                    }
                    Err(e) => debug!(path = ?path, error = %e, "could not hash changed file"),
                }
                continue;
            }

            // Gone: either a single unit or a whole directory of them.
            let prefix = format!("{rel}/");
            let removed: Vec<String> = self
                .present
                .iter()
                .filter(|u| **u == rel || u.starts_with(&prefix))
                .cloned()
                .collect();
            for unit in removed {
                self.present.remove(&unit);
                self.queued.push_back(UnitEvent {
                    unit: UnitId::new(unit),
                    fingerprint: None,
                    observed_at,
                });
            }
        }
    }
}

impl ResourceAdapter for NotifyAdapter {
    fn name(&self) -> &str {
        "notify"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Push
    }

    fn connect(&mut self) -> AdapterFuture<'_, ()> {
        Box::pin(async move { self.start_watching() })
    }

    fn next(&mut self) -> AdapterFuture<'_, Observed> {
        Box::pin(async move {
            if self.needs_resync {
                let root = self.root.clone();
                let filter = Arc::clone(&self.filter);
                let fs = Arc::clone(&self.fs);
                let snapshot =
                    tokio::task::spawn_blocking(move || snapshot_tree(fs.as_ref(), &root, &filter))
                        .await
                        .map_err(AdapterError::transient)?
                        .map_err(|e| AdapterError::Transient(format!("{e:#}")))?;

                self.present = snapshot.units.keys().map(|u| u.as_str().to_string()).collect();
                self.needs_resync = false;
                return Ok(Observed::Snapshot(snapshot));
            }

            loop {
                if let Some(event) = self.queued.pop_front() {
                    return Ok(Observed::Event(event));
                }

                let rx = self
                    .events_rx
                    .as_mut()
                    .ok_or_else(|| AdapterError::Transient("notify adapter not connected".into()))?;

                match rx.recv().await {
                    Some(Ok(event)) => {
                        debug!(?event, "received notify event");
                        self.translate(event);
                    }
                    Some(Err(e)) => return Err(AdapterError::transient(e)),
                    None => {
                        self.watcher = None;
                        self.events_rx = None;
                        return Err(AdapterError::Transient("notify event channel closed".into()));
                    }
                }
            }
        })
    }
}
