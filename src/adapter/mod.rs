// src/adapter/mod.rs

//! Resource adapters: where observations come from.
//!
//! The watch loop talks to a [`ResourceAdapter`] instead of a concrete
//! resource. This keeps the loop testable with a scripted adapter while
//! production uses [`DirectoryAdapter`] (pull) or [`NotifyAdapter`] (push).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

use crate::config::AdapterSettings;
use crate::errors::AdapterError;
use crate::fs::RealFileSystem;
use crate::types::AdapterKind;
use crate::watch::{Observation, UnitEvent, UnitFilter};

pub mod directory;
pub mod notify;

pub use directory::{snapshot_tree, DirectoryAdapter};
pub use notify::NotifyAdapter;

/// Boxed future returned by adapter operations.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AdapterError>> + Send + 'a>>;

/// How the watch loop should drive an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Call `next` once per poll interval; each call returns a snapshot.
    Poll,
    /// Call `next` back to back; it blocks until something happens.
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Snapshot(Observation),
    Event(UnitEvent),
}

pub trait ResourceAdapter: Send {
    fn name(&self) -> &str;

    fn cadence(&self) -> Cadence;

    /// (Re)establish the connection. Called before the first `next` and
    /// after any failed `next`.
    fn connect(&mut self) -> AdapterFuture<'_, ()>;

    /// Fetch the next observation.
    ///
    /// The watch loop runs each call to completion on a dedicated task. The
    /// future is only dropped when a poll observation times out or the loop
    /// shuts down.
    fn next(&mut self) -> AdapterFuture<'_, Observed>;
}

impl ResourceAdapter for Box<dyn ResourceAdapter> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn cadence(&self) -> Cadence {
        (**self).cadence()
    }

    fn connect(&mut self) -> AdapterFuture<'_, ()> {
        (**self).connect()
    }

    fn next(&mut self) -> AdapterFuture<'_, Observed> {
        (**self).next()
    }
}

/// Build the adapter selected by `[adapter].kind`, rooted at `root`.
pub fn build_adapter(settings: &AdapterSettings, root: PathBuf) -> Result<Box<dyn ResourceAdapter>> {
    let filter = Arc::new(UnitFilter::with_state_dir_excluded(
        &settings.include,
        &settings.exclude,
    )?);
    let fs = Arc::new(RealFileSystem);

    Ok(match settings.kind {
        AdapterKind::Directory => Box::new(DirectoryAdapter::new(root, filter, fs)),
        AdapterKind::Notify => Box::new(NotifyAdapter::new(root, filter, fs)),
    })
}
