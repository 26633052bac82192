// src/watch/patterns.rs

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::watch::change::UnitId;

/// Directory that holds changewatch's own state (baseline file). Never a unit.
pub const STATE_DIR_GLOB: &str = ".changewatch/**";

/// Compiled include/exclude globs deciding which paths are units.
///
/// Patterns are matched against paths relative to the watch root, with
/// forward slashes (e.g. `"src/main.rs"`).
#[derive(Clone)]
pub struct UnitFilter {
    include: GlobSet,
    exclude: Option<GlobSet>,
}

impl fmt::Debug for UnitFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitFilter").finish_non_exhaustive()
    }
}

impl UnitFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = build_globset(include).context("building include globset")?;
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).context("building exclude globset")?)
        };
        Ok(Self { include, exclude })
    }

    /// Filter that also hides changewatch's state directory.
    pub fn with_state_dir_excluded(include: &[String], exclude: &[String]) -> Result<Self> {
        let mut exclude = exclude.to_vec();
        exclude.push(STATE_DIR_GLOB.to_string());
        Self::new(include, &exclude)
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.include.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }

    /// Map a path under `root` to its unit id, if it is a unit at all.
    pub fn unit_for_path(&self, root: &Path, path: &Path) -> Option<UnitId> {
        let rel = relative_str(root, path)?;
        if rel.is_empty() || !self.matches(&rel) {
            return None;
        }
        Some(UnitId::new(rel))
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Falls back to comparing canonical paths, which matters on platforms that
/// report events under a different absolute prefix (macOS `/private/var`).
/// A deleted path cannot be canonicalized, so callers should pass an already
/// canonical `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    None
}
