// src/adapter/directory.rs

//! Polling adapter that snapshots a directory tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::adapter::{AdapterFuture, Cadence, Observed, ResourceAdapter};
use crate::errors::AdapterError;
use crate::fs::FileSystem;
use crate::watch::{compute_file_fingerprint, Observation, UnitFilter};

/// Units are the files under `root` that pass the filter; fingerprints are
/// content hashes.
#[derive(Debug, Clone)]
pub struct DirectoryAdapter {
    root: PathBuf,
    filter: Arc<UnitFilter>,
    fs: Arc<dyn FileSystem>,
}

impl DirectoryAdapter {
    pub fn new(root: impl Into<PathBuf>, filter: Arc<UnitFilter>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            filter,
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceAdapter for DirectoryAdapter {
    fn name(&self) -> &str {
        "directory"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Poll
    }

    fn connect(&mut self) -> AdapterFuture<'_, ()> {
        let ok = self.fs.is_dir(&self.root);
        let root = self.root.clone();
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(AdapterError::Transient(format!(
                    "watch root {:?} is not a readable directory",
                    root
                )))
            }
        })
    }

    fn next(&mut self) -> AdapterFuture<'_, Observed> {
        let root = self.root.clone();
        let filter = Arc::clone(&self.filter);
        let fs = Arc::clone(&self.fs);

        Box::pin(async move {
            let snapshot =
                tokio::task::spawn_blocking(move || snapshot_tree(fs.as_ref(), &root, &filter))
                    .await
                    .map_err(AdapterError::transient)?
                    .map_err(|e| AdapterError::Transient(format!("{e:#}")))?;
            Ok(Observed::Snapshot(snapshot))
        })
    }
}

/// Walk `root` and fingerprint every matching file.
///
/// A failure to read `root` itself is an error. Entries that vanish while the
/// walk is in progress are skipped; the next snapshot reports them. Symlinks
/// are not followed, so a link back into the tree cannot produce units.
pub fn snapshot_tree(fs: &dyn FileSystem, root: &Path, filter: &UnitFilter) -> Result<Observation> {
    let mut observation = Observation::new(SystemTime::now());

    if !fs.is_dir(root) {
        return Err(anyhow!("watch root {:?} is not a directory", root));
    }

    for path in fs.walk_files(root)? {
        let Some(unit) = filter.unit_for_path(root, &path) else {
            continue;
        };
        match compute_file_fingerprint(fs, &path) {
            Ok(fp) => {
                observation.units.insert(unit, fp);
            }
            Err(e) => debug!(path = ?path, error = %e, "file vanished during snapshot"),
        }
    }

    debug!(root = ?root, units = observation.len(), "directory snapshot taken");
    Ok(observation)
}
